//! Deterministic in-memory delegates and sinks (testing only).
//!
//! `ScriptedGenerator` answers per capability from a script and counts calls,
//! so workflow tests can assert exactly which delegates ran.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::auditor::{ArtifactError, AuditReport, AuditSink};
use crate::delegate::{Capability, Completion, GenerationRequest, ImageToText, TextGenerator};
use crate::domain::{Criterion, DelegateError, DelegateResult};

/// JSON answer in the shape criterion evaluators expect.
pub fn criterion_reply(score: f64, comment: &str) -> String {
    serde_json::json!({ "score": score, "comment": comment }).to_string()
}

/// Scripted behaviour for one capability.
#[derive(Debug, Clone)]
pub enum Script {
    Reply(String),
    /// Fail with a malformed answer `remaining` times, then reply.
    FailThenReply { remaining: u32, reply: String },
    AlwaysFail,
    /// Reply after sleeping on the tokio clock.
    Delay { delay: Duration, reply: String },
    /// Never answer.
    Hang,
}

// ---------------------------------------------------------------------------
// ScriptedGenerator
// ---------------------------------------------------------------------------

/// Text generator driven by per-capability scripts. Unscripted capabilities fail.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    scripts: Mutex<HashMap<Capability, Script>>,
    calls: Mutex<HashMap<Capability, u32>>,
    requests: Mutex<HashMap<Capability, Vec<GenerationRequest>>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every criterion answers `Ok` with the given score.
    pub fn scoring(scores: &[(Criterion, f64)]) -> Self {
        scores.iter().fold(Self::new(), |gen, (criterion, score)| {
            gen.reply(
                Capability::from(*criterion),
                criterion_reply(*score, "Scripted examiner comment."),
            )
        })
    }

    pub fn script(self, capability: Capability, script: Script) -> Self {
        self.scripts.lock().unwrap().insert(capability, script);
        self
    }

    pub fn reply(self, capability: Capability, text: impl Into<String>) -> Self {
        self.script(capability, Script::Reply(text.into()))
    }

    pub fn fail_then_reply(self, capability: Capability, times: u32, text: impl Into<String>) -> Self {
        self.script(
            capability,
            Script::FailThenReply {
                remaining: times,
                reply: text.into(),
            },
        )
    }

    pub fn delayed_reply(self, capability: Capability, delay: Duration, text: impl Into<String>) -> Self {
        self.script(
            capability,
            Script::Delay {
                delay,
                reply: text.into(),
            },
        )
    }

    pub fn always_fail(self, capability: Capability) -> Self {
        self.script(capability, Script::AlwaysFail)
    }

    pub fn hang(self, capability: Capability) -> Self {
        self.script(capability, Script::Hang)
    }

    pub fn calls(&self, capability: Capability) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(&capability)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    /// Requests received for a capability, in call order.
    pub fn requests(&self, capability: Capability) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap()
            .get(&capability)
            .cloned()
            .unwrap_or_default()
    }

    /// Prompts received for a capability, in call order.
    pub fn prompts(&self, capability: Capability) -> Vec<String> {
        self.requests(capability)
            .into_iter()
            .map(|request| request.prompt)
            .collect()
    }

    fn next_step(&self, capability: Capability) -> Script {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(&capability) {
            Some(Script::FailThenReply { remaining, reply }) => {
                if *remaining == 0 {
                    Script::Reply(reply.clone())
                } else {
                    *remaining -= 1;
                    Script::AlwaysFail
                }
            }
            Some(other) => other.clone(),
            None => Script::AlwaysFail,
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> DelegateResult<Completion> {
        let capability = request.capability;
        *self.calls.lock().unwrap().entry(capability).or_insert(0) += 1;
        self.requests
            .lock()
            .unwrap()
            .entry(capability)
            .or_default()
            .push(request.clone());

        match self.next_step(capability) {
            Script::Reply(text) => Ok(Completion::text(text)),
            Script::Delay { delay, reply } => {
                tokio::time::sleep(delay).await;
                Ok(Completion::text(reply))
            }
            Script::AlwaysFail | Script::FailThenReply { .. } => Err(DelegateError::Malformed(
                format!("scripted failure for {capability}"),
            )),
            Script::Hang => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptedImageToText
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ScriptedImageToText {
    script: Script,
    calls: Mutex<u32>,
}

impl ScriptedImageToText {
    pub fn replying(text: impl Into<String>) -> Self {
        Self {
            script: Script::Reply(text.into()),
            calls: Mutex::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            script: Script::AlwaysFail,
            calls: Mutex::new(0),
        }
    }

    pub fn hanging() -> Self {
        Self {
            script: Script::Hang,
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ImageToText for ScriptedImageToText {
    async fn describe_image(
        &self,
        _image_reference: &str,
        _request: &GenerationRequest,
    ) -> DelegateResult<Completion> {
        *self.calls.lock().unwrap() += 1;
        match &self.script {
            Script::Reply(text) => Ok(Completion::text(text.clone())),
            Script::Delay { delay, reply } => {
                tokio::time::sleep(*delay).await;
                Ok(Completion::text(reply.clone()))
            }
            Script::Hang => std::future::pending().await,
            _ => Err(DelegateError::Unavailable("scripted image failure".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryAuditSink
// ---------------------------------------------------------------------------

/// Collects audit reports in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    reports: Mutex<Vec<AuditReport>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<AuditReport> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn deliver(&self, report: &AuditReport) -> Result<(), ArtifactError> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}
