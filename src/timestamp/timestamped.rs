use std::cmp::Ordering;

use crate::timestamp::Timestamp;

/// A value paired with the version it was written at.
///
/// Ordered by value first and then by timestamp *descending*, so that in any
/// sorted container the newest version of a value comes first.
#[derive(PartialEq, Eq, Debug, Clone, Hash)]
pub struct Timestamped<V> {
    pub ts: Timestamp,
    pub value: V,
}

impl<V> Copy for Timestamped<V> where V: Copy {}

impl<V> Timestamped<V> {
    pub fn new(value: V, ts: Timestamp) -> Self {
        Self { value, ts }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn ts(&self) -> Timestamp {
        self.ts
    }

    pub fn into_parts(self) -> (V, Timestamp) {
        (self.value, self.ts)
    }
}

impl<V> PartialOrd<Self> for Timestamped<V>
where
    V: PartialOrd,
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.value
            .partial_cmp(&other.value)
            .map(|ordering| ordering.then_with(|| other.ts.cmp(&self.ts)))
    }
}

impl<V> Ord for Timestamped<V>
where
    V: Ord,
{
    fn cmp(&self, other: &Self) -> Ordering {
        self.value
            .cmp(&other.value)
            .then_with(|| other.ts.cmp(&self.ts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_cmp() {
        let value1 = Timestamped::new(1, Timestamp::new(1));
        let value2 = Timestamped::new(2, Timestamp::new(2));
        assert!(value1 < value2);

        let value1 = Timestamped::new(1, Timestamp::new(1));
        let value2 = Timestamped::new(1, Timestamp::new(2));
        assert!(value1 > value2);
    }

    #[test]
    fn test_value_eq() {
        let value1 = Timestamped::new(1, Timestamp::new(1));
        let value2 = Timestamped::new(1, Timestamp::new(1));
        assert_eq!(value1, value2);

        let value1 = Timestamped::new(1, Timestamp::new(1));
        let value2 = Timestamped::new(2, Timestamp::new(1));
        assert_ne!(value1, value2);

        let value1 = Timestamped::new(1, Timestamp::new(1));
        let value2 = Timestamped::new(1, Timestamp::new(2));
        assert_ne!(value1, value2);
    }

    #[test]
    fn test_into_parts() {
        let value = Timestamped::new("abc", Timestamp::new(7));
        assert_eq!(value.into_parts(), ("abc", Timestamp::new(7)));
    }
}
