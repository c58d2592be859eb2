//! Quota class
//!
//! Threads are attached to per-CPU groups sharing a CPU-time budget that is
//! refilled every quota period. While its group has budget a thread
//! competes by priority in the class run-queue; once the budget is spent
//! the group's threads are parked on an expired list until the next refill.
//!
//! A group may be given a peak above its quota: budget left unused in one
//! period then becomes credit that can be spent in later ones, up to the
//! peak. Credit is dropped while a group has no runnable thread.

use crate::scheduler::core::domain::Domain;
use crate::scheduler::core::error::{SchedulerError, SchedulerResult};
use crate::scheduler::core::policy::{check_prio, set_effective_priority, ClassId, SchedClass, SchedParam};
use crate::scheduler::core::runqueue::MultiLevelQueue;
use crate::scheduler::realtime::priorities::{QUOTA_MAX_PRIO, QUOTA_MIN_PRIO, QUOTA_WEIGHT};
use crate::scheduler::thread::{ThreadId, ThreadInfo, ThreadState};
use crate::time::{Ticks, TimerId, TimerMode};
use alloc::vec::Vec;

/// Runtime budget shared by a set of threads on one CPU
#[derive(Debug, Clone)]
struct QuotaGroup {
    tgid: u32,
    quota_percent: u32,
    quota_peak_percent: u32,
    quota: Ticks,
    quota_peak: Ticks,
    run_start: Ticks,
    run_budget: Ticks,
    run_credit: Ticks,
    /// Members linked to the run-queue or the expired list
    nr_active: usize,
    /// Members attached, runnable or not
    nr_threads: usize,
}

impl QuotaGroup {
    fn charge(&mut self, now: Ticks) {
        let elapsed = now.saturating_sub(self.run_start);
        self.run_budget = self.run_budget.saturating_sub(elapsed);
        self.run_start = now;
    }

    /// Budget for a new period
    fn replenish(&mut self) {
        if self.quota == self.quota_peak {
            // No credit accumulation, including groups without a limit.
            self.run_budget = self.quota;
            return;
        }
        if self.nr_active == 0 {
            self.run_credit = 0;
            self.run_budget = self.quota;
            return;
        }
        let headroom = self.quota_peak - self.quota;
        let credit = self.run_credit.saturating_add(self.run_budget).min(headroom);
        self.run_budget = self.quota.saturating_add(credit);
        self.run_credit = 0;
    }
}

/// Snapshot of a quota group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaGroupInfo {
    pub tgid: u32,
    pub quota_percent: u32,
    pub quota_peak_percent: u32,
    pub run_budget: Ticks,
    pub run_credit: Ticks,
    pub nr_active: usize,
    pub nr_threads: usize,
}

/// Per-CPU quota state
pub struct QuotaSched {
    period: Ticks,
    refill_timer: TimerId,
    limit_timer: TimerId,
    runnable: MultiLevelQueue,
    expired: Vec<ThreadId>,
    groups: Vec<QuotaGroup>,
    next_tgid: u32,
}

impl QuotaSched {
    pub(crate) fn new(period: Ticks, refill_timer: TimerId, limit_timer: TimerId) -> Self {
        Self {
            period,
            refill_timer,
            limit_timer,
            runnable: MultiLevelQueue::new(),
            expired: Vec::with_capacity(16),
            groups: Vec::new(),
            next_tgid: 0,
        }
    }

    fn group(&self, tgid: u32) -> Option<&QuotaGroup> {
        self.groups.iter().find(|g| g.tgid == tgid)
    }

    fn group_mut(&mut self, tgid: u32) -> Option<&mut QuotaGroup> {
        self.groups.iter_mut().find(|g| g.tgid == tgid)
    }
}

/// `percent` percent of `period`, without overflowing on long periods
fn percent_of(period: Ticks, percent: u32) -> Ticks {
    (period as u128 * percent as u128 / 100) as Ticks
}

fn quota_of(d: &mut Domain, cpu: usize) -> Option<&mut QuotaSched> {
    d.scheds.get_mut(cpu).and_then(|s| s.quota.as_deref_mut())
}

pub struct QuotaClass;

impl QuotaClass {
    fn link(d: &mut Domain, tid: ThreadId, at_head: bool) {
        let (cpu, prio, tgid) = {
            let t = &d.threads[tid];
            (t.cpu, t.cprio, t.quota_group)
        };
        let Some(qs) = d.scheds[cpu].quota.as_deref_mut() else {
            return;
        };
        let exhausted = match tgid.and_then(|id| qs.group_mut(id)) {
            Some(g) => {
                g.nr_active += 1;
                g.run_budget == 0
            }
            None => false,
        };
        if exhausted && !d.threads[tid].info.contains(ThreadInfo::KICKED) {
            qs.expired.push(tid);
            d.threads[tid].quota_expired = true;
        } else if at_head {
            qs.runnable.add_head(&mut d.threads, tid, prio);
        } else {
            qs.runnable.add_tail(&mut d.threads, tid, prio);
        }
    }
}

impl SchedClass for QuotaClass {
    fn id(&self) -> ClassId {
        ClassId::Quota
    }

    fn name(&self) -> &'static str {
        "quota"
    }

    fn weight(&self) -> i32 {
        QUOTA_WEIGHT
    }

    fn prio_range(&self) -> (i32, i32) {
        (QUOTA_MIN_PRIO, QUOTA_MAX_PRIO)
    }

    fn enqueue(&self, d: &mut Domain, tid: ThreadId) {
        Self::link(d, tid, false);
    }

    fn requeue(&self, d: &mut Domain, tid: ThreadId) {
        Self::link(d, tid, true);
    }

    fn dequeue(&self, d: &mut Domain, tid: ThreadId) {
        let (cpu, tgid) = {
            let t = &d.threads[tid];
            (t.cpu, t.quota_group)
        };
        let Some(qs) = d.scheds[cpu].quota.as_deref_mut() else {
            return;
        };
        if d.threads[tid].quota_expired {
            qs.expired.retain(|&t| t != tid);
            d.threads[tid].quota_expired = false;
        } else {
            qs.runnable.remove(&mut d.threads, tid);
        }
        if let Some(g) = tgid.and_then(|id| qs.group_mut(id)) {
            g.nr_active = g.nr_active.saturating_sub(1);
        }
    }

    fn pick(&self, d: &mut Domain, cpu: usize) -> Option<ThreadId> {
        let now = d.now;
        let curr = d.scheds[cpu].curr;
        let curr_group = d.threads[curr].quota_group;
        let Some(qs) = d.scheds[cpu].quota.as_deref_mut() else {
            return None;
        };

        // Charge the outgoing member for the time it just ran.
        if let Some(g) = curr_group.and_then(|id| qs.group_mut(id)) {
            g.charge(now);
        }

        let limit_timer = qs.limit_timer;
        let picked = loop {
            let Some(next) = qs.runnable.pick_highest(&mut d.threads) else {
                d.timers.stop(limit_timer);
                return None;
            };
            let t = &d.threads[next];
            let Some(tgid) = t.quota_group else {
                // Boosted into this class from elsewhere: no budget applies.
                return Some(next);
            };
            let kicked = t.info.contains(ThreadInfo::KICKED);
            let Some(g) = qs.group_mut(tgid) else {
                return Some(next);
            };
            g.run_start = now;
            if kicked {
                d.timers.stop(limit_timer);
                break next;
            }
            if g.run_budget == 0 {
                qs.expired.push(next);
                d.threads[next].quota_expired = true;
                continue;
            }
            if curr_group == Some(tgid) && d.timers.is_running(limit_timer) {
                break next;
            }
            let deadline = now.saturating_add(g.run_budget);
            let _ = d.timers.start(limit_timer, deadline, None, TimerMode::Absolute);
            break next;
        };

        if let Some(g) = d.threads[picked].quota_group.and_then(|id| qs.group_mut(id)) {
            g.nr_active = g.nr_active.saturating_sub(1);
        }
        Some(picked)
    }

    fn migrate(&self, d: &mut Domain, tid: ThreadId, _to: usize) {
        // Groups are per-CPU: leaving the CPU means leaving the group.
        let prio = d.threads[tid].cprio;
        if let Err(err) = d.set_policy(tid, SchedParam::Rt { prio }) {
            log::error!("[QUOTA] cannot move {} to rt: {}", tid, err);
        }
    }

    fn chkparam(&self, d: &Domain, cpu: usize, param: &SchedParam) -> SchedulerResult<()> {
        let SchedParam::Quota { prio, tgid } = param else {
            return Err(SchedulerError::InvalidParam { reason: "not a quota parameter" });
        };
        check_prio(self, *prio)?;
        let known = d.scheds[cpu]
            .quota
            .as_deref()
            .is_some_and(|qs| qs.group(*tgid).is_some());
        if known {
            Ok(())
        } else {
            Err(SchedulerError::QuotaGroupNotFound { cpu_id: cpu, tgid: *tgid })
        }
    }

    fn declare(&self, d: &mut Domain, tid: ThreadId, param: &SchedParam) {
        let SchedParam::Quota { tgid, .. } = *param else {
            return;
        };
        let cpu = d.threads[tid].cpu;
        if let Some(g) = quota_of(d, cpu).and_then(|qs| qs.group_mut(tgid)) {
            g.nr_threads += 1;
        }
        d.threads[tid].quota_group = Some(tgid);
    }

    fn forget(&self, d: &mut Domain, tid: ThreadId) {
        let cpu = d.threads[tid].cpu;
        if let Some(tgid) = d.threads[tid].quota_group.take() {
            if let Some(g) = quota_of(d, cpu).and_then(|qs| qs.group_mut(tgid)) {
                g.nr_threads = g.nr_threads.saturating_sub(1);
            }
        }
    }

    fn setparam(&self, d: &mut Domain, tid: ThreadId, param: &SchedParam) -> bool {
        let SchedParam::Quota { prio, tgid } = *param else {
            return false;
        };
        let cpu = d.threads[tid].cpu;
        let old = d.threads[tid].quota_group;
        if old != Some(tgid) {
            if let Some(qs) = quota_of(d, cpu) {
                if let Some(g) = old.and_then(|id| qs.group_mut(id)) {
                    g.nr_threads = g.nr_threads.saturating_sub(1);
                }
                if let Some(g) = qs.group_mut(tgid) {
                    g.nr_threads += 1;
                }
            }
            d.threads[tid].quota_group = Some(tgid);
        }
        if !d.threads[tid].state.contains(ThreadState::BOOSTED) {
            d.threads[tid].state.remove(ThreadState::WEAK);
        }
        set_effective_priority(d, tid, prio)
    }

    fn getparam(&self, d: &Domain, tid: ThreadId) -> SchedParam {
        let t = &d.threads[tid];
        match t.quota_group {
            Some(tgid) => SchedParam::Quota { prio: t.bprio, tgid },
            None => SchedParam::Rt { prio: t.bprio },
        }
    }

    fn resume_activity(&self, d: &mut Domain, tid: ThreadId) {
        let now = d.now;
        let (cpu, tgid) = {
            let t = &d.threads[tid];
            (t.cpu, t.quota_group)
        };
        if let Some(g) = tgid.and_then(|id| quota_of(d, cpu).and_then(|qs| qs.group_mut(id))) {
            g.run_start = now;
        }
    }

    fn suspend_activity(&self, d: &mut Domain, tid: ThreadId) {
        let now = d.now;
        let (cpu, tgid) = {
            let t = &d.threads[tid];
            (t.cpu, t.quota_group)
        };
        if let Some(g) = tgid.and_then(|id| quota_of(d, cpu).and_then(|qs| qs.group_mut(id))) {
            g.charge(now);
        }
    }

    fn kick(&self, d: &mut Domain, tid: ThreadId) {
        if !d.threads[tid].quota_expired {
            return;
        }
        let (cpu, prio) = {
            let t = &d.threads[tid];
            (t.cpu, t.cprio)
        };
        let Some(qs) = d.scheds[cpu].quota.as_deref_mut() else {
            return;
        };
        qs.expired.retain(|&t| t != tid);
        d.threads[tid].quota_expired = false;
        qs.runnable.add_tail(&mut d.threads, tid, prio);
    }
}

/// Quota period elapsed: refill every group and requeue what can run again
pub(crate) fn refill_expired(d: &mut Domain, cpu: usize) {
    let Some(qs) = d.scheds[cpu].quota.as_deref_mut() else {
        return;
    };
    for g in qs.groups.iter_mut() {
        g.replenish();
    }

    let parked = core::mem::take(&mut qs.expired);
    for tid in parked {
        let (prio, tgid) = {
            let t = &d.threads[tid];
            (t.cprio, t.quota_group)
        };
        let has_budget = tgid
            .and_then(|id| qs.group(id))
            .map_or(true, |g| g.run_budget > 0);
        if has_budget {
            d.threads[tid].quota_expired = false;
            qs.runnable.add_tail(&mut d.threads, tid, prio);
        } else {
            qs.expired.push(tid);
        }
    }
    d.set_resched(cpu);
}

/// Running group ran out of budget
pub(crate) fn limit_expired(d: &mut Domain, cpu: usize) {
    d.set_resched(cpu);
}

// ───────────────────────────────────────────────────────────────────────────
// Group management
// ───────────────────────────────────────────────────────────────────────────

impl Domain {
    fn quota_sched(&mut self, cpu: usize) -> SchedulerResult<&mut QuotaSched> {
        if cpu >= self.scheds.len() {
            return Err(SchedulerError::CpuNotAvailable { cpu_id: cpu });
        }
        quota_of(self, cpu).ok_or(SchedulerError::ClassNotAvailable { class: "quota" })
    }

    /// New group on `cpu` with no limit (quota = peak = period)
    pub(crate) fn quota_create_group(&mut self, cpu: usize) -> SchedulerResult<u32> {
        let max = self.config.max_quota_groups;
        let now = self.now;
        let qs = self.quota_sched(cpu)?;
        if qs.groups.len() >= max {
            return Err(SchedulerError::QuotaGroupsFull { cpu_id: cpu, max });
        }
        let tgid = qs.next_tgid;
        qs.next_tgid += 1;
        let period = qs.period;
        qs.groups.push(QuotaGroup {
            tgid,
            quota_percent: 100,
            quota_peak_percent: 100,
            quota: period,
            quota_peak: period,
            run_start: now,
            run_budget: period,
            run_credit: 0,
            nr_active: 0,
            nr_threads: 0,
        });
        let first = qs.groups.len() == 1;
        let refill = qs.refill_timer;
        if first {
            self.timers.start(refill, now.saturating_add(period), Some(period), TimerMode::Absolute)?;
        }
        log::debug!("[QUOTA] group {} created on CPU {}", tgid, cpu);
        Ok(tgid)
    }

    /// Set a group's quota and peak, as percentages of the period
    pub(crate) fn quota_set_limit(
        &mut self,
        cpu: usize,
        tgid: u32,
        quota_percent: u32,
        peak_percent: u32,
    ) -> SchedulerResult<()> {
        if quota_percent > 100 || peak_percent > 100 || peak_percent < quota_percent {
            return Err(SchedulerError::InvalidParam { reason: "bad quota percentages" });
        }
        let qs = self.quota_sched(cpu)?;
        let period = qs.period;
        let g = qs
            .group_mut(tgid)
            .ok_or(SchedulerError::QuotaGroupNotFound { cpu_id: cpu, tgid })?;
        g.quota_percent = quota_percent;
        g.quota_peak_percent = peak_percent;
        g.quota = percent_of(period, quota_percent);
        g.quota_peak = percent_of(period, peak_percent);
        g.run_credit = 0;
        g.run_budget = g.run_budget.min(g.quota_peak);
        self.set_resched(cpu);
        Ok(())
    }

    /// Remove a group. Attached threads block removal unless `force`, which
    /// moves them to the rt class at their base priority.
    pub(crate) fn quota_destroy_group(&mut self, cpu: usize, tgid: u32, force: bool) -> SchedulerResult<()> {
        let qs = self.quota_sched(cpu)?;
        let g = qs
            .group(tgid)
            .ok_or(SchedulerError::QuotaGroupNotFound { cpu_id: cpu, tgid })?;
        if g.nr_threads > 0 && !force {
            return Err(SchedulerError::GroupBusy { tgid, threads: g.nr_threads });
        }

        let members = self
            .threads
            .select(|t| t.cpu == cpu && t.base_class == ClassId::Quota && t.quota_group == Some(tgid));
        for tid in members {
            let prio = self.threads[tid].bprio;
            self.set_policy(tid, SchedParam::Rt { prio })?;
        }

        let qs = self.quota_sched(cpu)?;
        qs.groups.retain(|g| g.tgid != tgid);
        if qs.groups.is_empty() {
            let (refill, limit) = (qs.refill_timer, qs.limit_timer);
            self.timers.stop(refill);
            self.timers.stop(limit);
        }
        log::debug!("[QUOTA] group {} destroyed on CPU {}", tgid, cpu);
        Ok(())
    }

    pub(crate) fn quota_group_info(&mut self, cpu: usize, tgid: u32) -> SchedulerResult<QuotaGroupInfo> {
        let qs = self.quota_sched(cpu)?;
        let g = qs
            .group(tgid)
            .ok_or(SchedulerError::QuotaGroupNotFound { cpu_id: cpu, tgid })?;
        Ok(QuotaGroupInfo {
            tgid: g.tgid,
            quota_percent: g.quota_percent,
            quota_peak_percent: g.quota_peak_percent,
            run_budget: g.run_budget,
            run_credit: g.run_credit,
            nr_active: g.nr_active,
            nr_threads: g.nr_threads,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(quota: Ticks, peak: Ticks) -> QuotaGroup {
        QuotaGroup {
            tgid: 0,
            quota_percent: 0,
            quota_peak_percent: 0,
            quota,
            quota_peak: peak,
            run_start: 0,
            run_budget: quota,
            run_credit: 0,
            nr_active: 1,
            nr_threads: 1,
        }
    }

    #[test]
    fn flat_group_refills_to_quota() {
        let mut g = group(300, 300);
        g.run_budget = 10;
        g.replenish();
        assert_eq!(g.run_budget, 300);
    }

    #[test]
    fn unused_budget_carries_up_to_peak() {
        let mut g = group(300, 500);
        g.run_budget = 120;
        g.replenish();
        assert_eq!(g.run_budget, 420);

        g.run_budget = 400;
        g.replenish();
        assert_eq!(g.run_budget, 500);
    }

    #[test]
    fn idle_group_loses_credit() {
        let mut g = group(300, 500);
        g.run_budget = 200;
        g.nr_active = 0;
        g.replenish();
        assert_eq!(g.run_budget, 300);
        assert_eq!(g.run_credit, 0);
    }

    #[test]
    fn charge_consumes_budget() {
        let mut g = group(300, 300);
        g.run_start = 100;
        g.charge(250);
        assert_eq!(g.run_budget, 150);
        g.charge(1_000);
        assert_eq!(g.run_budget, 0);
        assert_eq!(g.run_start, 1_000);
    }
}
