//! In-test collaborator doubles.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use pingbox_core::error::{PingBoxError, Result};
use pingbox_core::traits::{TextGenerator, Transport};
use pingbox_core::types::{GenerationContext, UserId};

/// Records every message; can be switched to fail.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<(UserId, String)>>,
    pub fail: AtomicBool,
}

impl RecordingTransport {
    pub fn failing() -> Self {
        let t = Self::default();
        t.fail.store(true, Ordering::SeqCst);
        t
    }

    pub fn messages(&self) -> Vec<(UserId, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, user_id: UserId, text: &str) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PingBoxError::Transport("403 Forbidden: bot was blocked".into()));
        }
        self.sent.lock().unwrap().push((user_id, text.to_string()));
        Ok(())
    }
}

/// Replies `"<prefix> <entity>"`, fails for entity "fail", panics for "boom",
/// hangs for "slow".
pub struct ScriptedGenerator {
    pub prefix: String,
}

impl ScriptedGenerator {
    pub fn new(prefix: &str) -> Self {
        Self { prefix: prefix.to_string() }
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, context: &GenerationContext) -> Result<String> {
        match context.entity_name.as_str() {
            "fail" => Err(PingBoxError::Provider("upstream 500".into())),
            "boom" => panic!("generator exploded"),
            "slow" => {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Ok(String::new())
            }
            name => Ok(format!("{} {}", self.prefix, name)),
        }
    }
}
