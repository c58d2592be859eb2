//! Priority boosting
//!
//! A resource owner is boosted either by inheritance, taking the class and
//! priority of its highest waiter, or by a priority ceiling, which always
//! runs it in the rt class. The boosted state lives in the effective class
//! and current priority; the base class and priority keep what the owner
//! asked for, and are restored when the last boost goes away.

use super::domain::Domain;
use super::policy::{class_of, weighted, ClassId};
use crate::scheduler::thread::{ThreadId, ThreadState};

impl Domain {
    /// Make `tid` inherit the scheduling class and priority of `target`,
    /// or return to its base settings when `target` is `None`.
    pub(crate) fn track_policy(&mut self, tid: ThreadId, target: Option<ThreadId>) {
        let ready = self.threads[tid].state.contains(ThreadState::READY);
        if ready {
            self.dequeue(tid);
        }

        match target {
            None => {
                let class = self.threads[tid].base_class;
                self.threads[tid].sched_class = class;
                class_of(class).trackprio(self, tid, None);
                self.refresh_wprio(tid);
                // Dropping a boost keeps the thread at the head of its level.
                if ready {
                    self.requeue(tid);
                }
            }
            Some(target) => {
                let (class, prio) = {
                    let t = &self.threads[target];
                    (t.sched_class, t.cprio)
                };
                self.threads[tid].sched_class = class;
                class_of(class).trackprio(self, tid, Some(prio));
                self.refresh_wprio(tid);
                if ready {
                    self.enqueue(tid);
                }
            }
        }

        let cpu = self.threads[tid].cpu;
        self.set_resched(cpu);
    }

    /// Run `tid` in the rt class at the ceiling priority `prio`
    pub(crate) fn protect_priority(&mut self, tid: ThreadId, prio: i32) {
        let ready = self.threads[tid].state.contains(ThreadState::READY);
        if ready {
            self.dequeue(tid);
        }
        self.threads[tid].sched_class = ClassId::Rt;
        class_of(ClassId::Rt).protectprio(self, tid, prio);
        self.refresh_wprio(tid);
        if ready {
            self.enqueue(tid);
        }
        let cpu = self.threads[tid].cpu;
        self.set_resched(cpu);
    }

    fn refresh_wprio(&mut self, tid: ThreadId) {
        let t = &mut self.threads[tid];
        t.wprio = weighted(t.sched_class, t.cprio);
    }

    /// Weighted priority `tid` would have without any boost
    pub(crate) fn base_wprio(&self, tid: ThreadId) -> i32 {
        let t = &self.threads[tid];
        weighted(t.base_class, t.bprio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NucleusConfig;
    use crate::scheduler::core::affinity::CpuMask;
    use crate::scheduler::core::policy::SchedParam;
    use crate::scheduler::thread::ThreadAttr;

    fn domain() -> Domain {
        Domain::new(NucleusConfig::new(1), CpuMask::first_n(1))
    }

    fn ready(d: &mut Domain, name: &str, param: SchedParam) -> ThreadId {
        let tid = d.thread_init(&ThreadAttr::new(name), param).unwrap();
        d.start(tid).unwrap();
        tid
    }

    #[test]
    fn inheritance_reset_keeps_head_of_level() {
        let mut d = domain();
        let donor = d.thread_init(&ThreadAttr::new("donor"), SchedParam::Rt { prio: 40 }).unwrap();
        let p1 = ready(&mut d, "p1", SchedParam::Rt { prio: 10 });
        let p2 = ready(&mut d, "p2", SchedParam::Rt { prio: 10 });
        let x = ready(&mut d, "x", SchedParam::Rt { prio: 10 });

        d.track_policy(x, Some(donor));
        assert_eq!(d.threads[x].cprio, 40);
        assert_eq!(d.threads[x].wprio, weighted(ClassId::Rt, 40));
        assert_eq!(d.scheds[0].rt.peek_highest(), Some(x));

        d.track_policy(x, None);
        assert_eq!(d.threads[x].cprio, 10);
        assert_eq!(d.threads[x].wprio, d.base_wprio(x));
        // Back at its base level, ahead of the peers queued before it.
        assert_eq!(d.pick_next(0), x);
        assert_eq!(d.scheds[0].rt.peek_highest(), Some(p1));
        assert_ne!(d.scheds[0].rt.peek_highest(), Some(p2));
    }

    #[test]
    fn ceiling_raises_then_resets_to_base_class() {
        let mut d = domain();
        let peer = ready(&mut d, "peer", SchedParam::Weak { prio: 5 });
        let x = ready(&mut d, "x", SchedParam::Weak { prio: 5 });

        d.protect_priority(x, 60);
        assert_eq!(d.threads[x].sched_class, ClassId::Rt);
        assert_eq!(d.threads[x].wprio, weighted(ClassId::Rt, 60));
        assert_eq!(d.scheds[0].rt.peek_highest(), Some(x));

        d.track_policy(x, None);
        assert_eq!(d.threads[x].sched_class, ClassId::Weak);
        assert_eq!(d.threads[x].cprio, 5);
        assert_eq!(d.scheds[0].rt.peek_highest(), None);
        assert_eq!(d.pick_next(0), x);
        assert_eq!(d.scheds[0].weak.peek_highest(), Some(peer));
    }
}
