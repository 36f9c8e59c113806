//! Desires and intentions.
//!
//! A role declares its desires once, in priority order, as predicate/plan
//! pairs. Each cycle the predicates run top-down against a fresh
//! situation; the first unsatisfied desire yields the plan, with its
//! parameters built from that situation. When every desire is satisfied
//! the fallback desire decides.

use std::fmt;

/// A plan an intention can dispatch.
pub trait Plan: fmt::Debug + Send + 'static {
    /// Short name used in logs.
    fn label(&self) -> &'static str;
}

/// Returns the plan to run when the desire is unsatisfied, `None` otherwise.
pub type Predicate<S, P> = fn(&S) -> Option<P>;

/// The single outcome of one deliberation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intention<P> {
    /// Desire that was selected.
    pub desire: &'static str,
    /// Plan bound to it.
    pub plan: P,
}

impl<P: Plan> Intention<P> {
    /// Name of the bound plan.
    #[must_use]
    pub fn plan_label(&self) -> &'static str {
        self.plan.label()
    }
}

/// Ordered desires of one role plus its terminal fallback.
pub struct DesireSet<S, P> {
    desires: Vec<(&'static str, Predicate<S, P>)>,
    fallback: (&'static str, fn(&S) -> P),
}

impl<S, P> fmt::Debug for DesireSet<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DesireSet")
            .field("desires", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

impl<S, P> DesireSet<S, P> {
    /// Creates a set with only the fallback desire.
    #[must_use]
    pub fn new(fallback_name: &'static str, fallback: fn(&S) -> P) -> Self {
        Self {
            desires: Vec::new(),
            fallback: (fallback_name, fallback),
        }
    }

    /// Appends a desire below every desire declared so far.
    #[must_use]
    pub fn with_desire(mut self, name: &'static str, predicate: Predicate<S, P>) -> Self {
        self.desires.push((name, predicate));
        self
    }

    /// Desire names in priority order, fallback last.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.desires
            .iter()
            .map(|(name, _)| *name)
            .chain(std::iter::once(self.fallback.0))
    }

    /// Picks exactly one intention for `situation`.
    pub fn deliberate(&self, situation: &S) -> Intention<P> {
        for &(name, predicate) in &self.desires {
            if let Some(plan) = predicate(situation) {
                return Intention { desire: name, plan };
            }
        }
        Intention {
            desire: self.fallback.0,
            plan: (self.fallback.1)(situation),
        }
    }
}
