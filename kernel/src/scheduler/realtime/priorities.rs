//! Priority ranges and class weights
//!
//! A thread's weighted priority is its class weight plus its current
//! priority. Class weights are spaced so that every priority of a heavier
//! class outranks every priority of a lighter one.

/// Distance between two consecutive class weights
pub const CLASS_WEIGHT_FACTOR: i32 = 1024;

/// Weight of class number `n`
pub const fn class_weight(n: i32) -> i32 {
    n * CLASS_WEIGHT_FACTOR
}

/// Idle (root) class
pub const IDLE_WEIGHT: i32 = class_weight(0);
/// Priority of every root thread
pub const IDLE_PRIO: i32 = -1;

/// Weak class
pub const WEAK_WEIGHT: i32 = class_weight(1);
pub const WEAK_MIN_PRIO: i32 = 0;
pub const WEAK_MAX_PRIO: i32 = 99;

/// Quota class
pub const QUOTA_WEIGHT: i32 = class_weight(2);

/// Sporadic class
pub const SPORADIC_WEIGHT: i32 = class_weight(3);

/// Fixed-priority (core real-time) class
pub const RT_WEIGHT: i32 = class_weight(4);
pub const RT_MIN_PRIO: i32 = 0;
pub const RT_MAX_PRIO: i32 = 257;

/// Every class sharing or mirroring the rt range uses these bounds
pub const QUOTA_MIN_PRIO: i32 = RT_MIN_PRIO;
pub const QUOTA_MAX_PRIO: i32 = RT_MAX_PRIO;
pub const SPORADIC_MIN_PRIO: i32 = RT_MIN_PRIO;
pub const SPORADIC_MAX_PRIO: i32 = RT_MAX_PRIO;

/// Number of distinct levels a multi-level run-queue holds
pub const MLQ_LEVELS: usize = (RT_MAX_PRIO - RT_MIN_PRIO + 1) as usize + 2;

/// Check `prio` against an inclusive range
#[inline]
pub const fn in_range(prio: i32, min: i32, max: i32) -> bool {
    prio >= min && prio <= max
}
