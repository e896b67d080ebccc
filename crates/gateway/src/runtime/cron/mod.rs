//! Scheduled isolated agent runs: a 5-field timezone-aware cron evaluator,
//! the versioned job store, and the runner enforcing fresh-session
//! discipline and model override policy.

mod eval;
mod runner;
mod store;

pub use eval::{parse_tz, CronExpr};
pub use runner::{CronRunner, RunReport, SkillCatalog};
pub use store::{CronJob, CronPayload, CronStore};
