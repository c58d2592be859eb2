//! Scheduling classes
//!
//! | class    | weight | priorities | run-queue          |
//! |----------|--------|------------|--------------------|
//! | rt       | 4      | 0..=257    | per-CPU rt MLQ     |
//! | sporadic | 3      | 0..=257    | shares the rt MLQ  |
//! | quota    | 2      | 0..=257    | own MLQ + expired  |
//! | weak     | 1      | 0..=99     | per-CPU weak MLQ   |
//! | idle     | 0      | -1         | none (root thread) |

pub mod idle;
pub mod quota;
pub mod rt;
pub mod sporadic;
pub mod weak;

pub use idle::IdleClass;
pub use quota::{QuotaClass, QuotaGroupInfo};
pub use rt::RtClass;
pub use sporadic::{SporadicClass, SPORADIC_MAX_REPL};
pub use weak::WeakClass;
