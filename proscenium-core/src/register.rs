//! Last-writer-wins registers.
//!
//! Every register carries the `(clock, op_id)` pair of the write that produced
//! its current value. A write is accepted only when its pair strictly
//! dominates the stored pair:
//!
//! ```text
//! (clock_a, op_id_a) > (clock_b, op_id_b)
//!     ⇔  clock_a > clock_b
//!     ∨ (clock_a = clock_b ∧ op_id_a > op_id_b)      (byte-wise string order)
//! ```
//!
//! Because the comparison is total and independent of arrival order, two
//! replicas that see the same set of writes end up holding the same value.
//!
//! Reference: Shapiro et al., "A comprehensive study of CRDTs", §3.2.1

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Logical stamp of a register write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stamp {
    pub clock: u64,
    pub op_id: String,
}

impl Stamp {
    pub fn new(clock: u64, op_id: impl Into<String>) -> Self {
        Self {
            clock,
            op_id: op_id.into(),
        }
    }

    /// Lexicographic comparison against a borrowed `(clock, op_id)` pair.
    pub fn cmp_pair(&self, clock: u64, op_id: &str) -> Ordering {
        self.clock
            .cmp(&clock)
            .then_with(|| self.op_id.as_str().cmp(op_id))
    }
}

impl PartialOrd for Stamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Stamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_pair(other.clock, &other.op_id)
    }
}

/// Last-writer-wins scalar cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LwwRegister<T> {
    value: T,
    stamp: Stamp,
}

impl<T: Clone + PartialEq> LwwRegister<T> {
    /// Create a register holding `value` at the zero stamp.
    ///
    /// Any real write (non-empty `op_id`) dominates the zero stamp.
    pub fn new(value: T) -> Self {
        Self {
            value,
            stamp: Stamp::default(),
        }
    }

    /// Offer a write. Returns `true` only if the *visible* value changed.
    ///
    /// A dominating write carrying the value already stored is accepted (the
    /// stamp advances) but reported as no change.
    pub fn update(&mut self, value: T, clock: u64, op_id: &str) -> bool {
        if self.stamp.cmp_pair(clock, op_id) != Ordering::Less {
            return false;
        }
        let changed = self.value != value;
        self.value = value;
        self.stamp = Stamp::new(clock, op_id);
        changed
    }

    /// Unconditional write used when restoring persisted state.
    pub fn assign(&mut self, value: T) {
        self.value = value;
        self.stamp = Stamp::default();
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    /// Whether a write at `(clock, op_id)` would be accepted.
    pub fn would_accept(&self, clock: u64, op_id: &str) -> bool {
        self.stamp.cmp_pair(clock, op_id) == Ordering::Less
    }
}

/// Last-writer-wins ordered list of ids.
///
/// Assigned sequences are normalized: empty ids and repeated ids are dropped,
/// keeping the first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderRegister {
    inner: LwwRegister<Vec<String>>,
}

impl OrderRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a replacement sequence under the usual LWW rule.
    pub fn update<I, S>(&mut self, ids: I, clock: u64, op_id: &str) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.update(normalize_ids(ids), clock, op_id)
    }

    pub fn assign<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.assign(normalize_ids(ids));
    }

    pub fn ids(&self) -> &[String] {
        self.inner.value()
    }

    pub fn stamp(&self) -> &Stamp {
        self.inner.stamp()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.ids().iter().position(|existing| existing == id)
    }

    pub fn len(&self) -> usize {
        self.ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids().is_empty()
    }
}

fn normalize_ids<I, S>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    ids.into_iter()
        .map(Into::into)
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_higher_clock_wins() {
        let mut reg = LwwRegister::new(None::<String>);
        assert!(reg.update(Some("a".into()), 1, "x:1"));
        assert!(reg.update(Some("b".into()), 2, "x:2"));
        assert!(!reg.update(Some("c".into()), 1, "z:9"));
        assert_eq!(reg.value().as_deref(), Some("b"));
        assert_eq!(reg.stamp(), &Stamp::new(2, "x:2"));
    }

    #[test]
    fn test_op_id_breaks_ties() {
        let mut forward = LwwRegister::new(String::new());
        forward.update("Alpha".into(), 1, "1");
        forward.update("Beta".into(), 1, "2");

        let mut backward = LwwRegister::new(String::new());
        backward.update("Beta".into(), 1, "2");
        backward.update("Alpha".into(), 1, "1");

        assert_eq!(forward.value(), "Beta");
        assert_eq!(backward.value(), "Beta");
    }

    #[test]
    fn test_equal_stamp_is_rejected() {
        let mut reg = LwwRegister::new(0);
        assert!(reg.update(5, 3, "a"));
        assert!(!reg.update(6, 3, "a"));
        assert_eq!(*reg.value(), 5);
    }

    #[test]
    fn test_same_value_accepted_but_unchanged() {
        let mut reg = LwwRegister::new(0);
        assert!(reg.update(7, 1, "a"));
        assert!(!reg.update(7, 2, "b"));
        // Stamp still advanced, so a write between the two stamps now loses.
        assert_eq!(reg.stamp(), &Stamp::new(2, "b"));
        assert!(!reg.update(8, 1, "z"));
        assert_eq!(*reg.value(), 7);
    }

    #[test]
    fn test_assign_resets_stamp() {
        let mut reg = LwwRegister::new(0);
        reg.update(1, 10, "a");
        reg.assign(42);
        assert_eq!(*reg.value(), 42);
        assert_eq!(reg.stamp(), &Stamp::default());
        assert!(reg.would_accept(0, "a"));
    }

    #[test]
    fn test_string_order_is_lexical() {
        // "10" < "9" byte-wise; tie-break must not be numeric.
        let mut reg = LwwRegister::new("");
        reg.update("nine", 1, "9");
        assert!(!reg.update("ten", 1, "10"));
        assert_eq!(*reg.value(), "nine");
    }

    #[test]
    fn test_order_register_normalizes() {
        let mut order = OrderRegister::new();
        assert!(order.update(["a", "", "b", "a", "c", "b"], 1, "op"));
        assert_eq!(order.ids(), ["a", "b", "c"]);
        assert_eq!(order.position("c"), Some(2));
        assert!(!order.contains(""));
    }

    #[test]
    fn test_order_register_lww() {
        let mut order = OrderRegister::new();
        order.update(["a", "b"], 5, "x");
        assert!(!order.update(["b", "a"], 4, "y"));
        assert!(order.update(["b", "a"], 5, "y"));
        assert_eq!(order.ids(), ["b", "a"]);
    }

    #[test]
    fn test_stamp_ordering() {
        assert!(Stamp::new(2, "a") > Stamp::new(1, "z"));
        assert!(Stamp::new(1, "b") > Stamp::new(1, "a"));
        assert_eq!(Stamp::new(1, "a").cmp(&Stamp::new(1, "a")), Ordering::Equal);
    }
}
