use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cron
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Scheduler tick interval.
    #[serde(default = "d_tick_seconds")]
    pub tick_seconds: u64,
    /// Timezone cron expressions are evaluated in.
    #[serde(default = "d_timezone")]
    pub timezone: String,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_seconds: d_tick_seconds(),
            timezone: d_timezone(),
        }
    }
}

fn d_true() -> bool {
    true
}
fn d_tick_seconds() -> u64 {
    30
}
fn d_timezone() -> String {
    "UTC".into()
}
