//! `clock` tool — current date and time in the user's timezone.

use async_trait::async_trait;
use chrono_tz::Tz;
use serde_json::{json, Value};

use super::{Tool, ToolOutcome};

pub struct ClockTool {
    tz: Tz,
}

impl ClockTool {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        "clock"
    }

    fn description(&self) -> &str {
        "Get the current date and time in the user's timezone. Use this before \
         any scheduling math instead of guessing what day it is."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, _input: Value) -> ToolOutcome {
        let now = steward_core::timezone::now_in(self.tz);
        ToolOutcome::success(format!(
            "{} ({}), unix {}",
            now.format("%Y-%m-%d %H:%M:%S %Z"),
            now.format("%A"),
            now.timestamp()
        ))
    }
}
