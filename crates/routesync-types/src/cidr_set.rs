//! Set of IP networks keyed by canonical CIDR notation.
//!
//! [`CidrSet`] is the building block for desired/actual reconciliation of
//! CIDR-keyed rule sets: build one set for each side and take the two
//! differences to get the entries to add and the entries to remove.
//!
//! ```
//! use routesync_types::CidrSet;
//!
//! let desired = CidrSet::parse(["10.0.0.0/24", "10.0.1.0/24"]).unwrap();
//! let actual = CidrSet::parse(["10.0.1.0/24", "10.0.2.0/24"]).unwrap();
//!
//! assert_eq!(desired.difference(&actual).to_strings(), vec!["10.0.0.0/24"]);
//! assert_eq!(actual.difference(&desired).to_strings(), vec!["10.0.2.0/24"]);
//! ```

use crate::{IpPrefix, ParseError};
use std::collections::HashMap;
use std::fmt;

/// A set of networks keyed by their canonical string form.
///
/// Membership is decided on the canonical key only, so `10.0.0.5/24` and
/// `10.0.0.0/24` are the same member.
#[derive(Debug, Clone, Default)]
pub struct CidrSet {
    items: HashMap<String, IpPrefix>,
}

impl CidrSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses every spec (surrounding whitespace is ignored) into a set.
    ///
    /// # Errors
    ///
    /// Fails on the first spec that is not a valid CIDR; no partial set is
    /// returned.
    pub fn parse<I, S>(specs: I) -> Result<Self, ParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for spec in specs {
            let prefix: IpPrefix = spec.as_ref().trim().parse()?;
            set.items.insert(prefix.to_string(), prefix);
        }
        Ok(set)
    }

    /// Adds items to the set.
    pub fn insert(&mut self, items: impl IntoIterator<Item = IpPrefix>) {
        for item in items {
            self.items.insert(item.to_string(), item);
        }
    }

    /// Removes items from the set. Absent items are ignored.
    pub fn delete<'a>(&mut self, items: impl IntoIterator<Item = &'a IpPrefix>) {
        for item in items {
            self.items.remove(&item.to_string());
        }
    }

    pub fn has(&self, item: &IpPrefix) -> bool {
        self.items.contains_key(&item.to_string())
    }

    /// Returns true if every item is in the set.
    pub fn has_all<'a>(&self, items: impl IntoIterator<Item = &'a IpPrefix>) -> bool {
        items.into_iter().all(|item| self.has(item))
    }

    /// Returns true if every member of `other` is also in `self`.
    pub fn is_superset(&self, other: &CidrSet) -> bool {
        other.items.keys().all(|k| self.items.contains_key(k))
    }

    /// Set equality: same cardinality and `self` is a superset of `other`.
    pub fn equal(&self, other: &CidrSet) -> bool {
        self.len() == other.len() && self.is_superset(other)
    }

    /// Returns the members of `self` that are not in `other`.
    ///
    /// ```text
    /// {a1, a2, a3}.difference({a1, a2, a4, a5}) = {a3}
    /// {a1, a2, a4, a5}.difference({a1, a2, a3}) = {a4, a5}
    /// ```
    pub fn difference(&self, other: &CidrSet) -> CidrSet {
        let items = self
            .items
            .iter()
            .filter(|(k, _)| !other.items.contains_key(*k))
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        CidrSet { items }
    }

    /// Returns the canonical keys. Order is unspecified.
    pub fn to_strings(&self) -> Vec<String> {
        self.items.keys().cloned().collect()
    }

    /// Returns the canonical keys in sorted order.
    pub fn to_sorted_strings(&self) -> Vec<String> {
        let mut keys = self.to_strings();
        keys.sort();
        keys
    }

    pub fn iter(&self) -> impl Iterator<Item = &IpPrefix> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl PartialEq for CidrSet {
    fn eq(&self, other: &Self) -> bool {
        self.equal(other)
    }
}

impl Eq for CidrSet {}

impl FromIterator<IpPrefix> for CidrSet {
    fn from_iter<T: IntoIterator<Item = IpPrefix>>(iter: T) -> Self {
        let mut set = CidrSet::new();
        set.insert(iter);
        set
    }
}

impl Extend<IpPrefix> for CidrSet {
    fn extend<T: IntoIterator<Item = IpPrefix>>(&mut self, iter: T) {
        self.insert(iter);
    }
}

impl fmt::Display for CidrSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.to_sorted_strings().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn prefix(s: &str) -> IpPrefix {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_trims_and_normalizes() {
        let set = CidrSet::parse([" 10.0.0.7/24 ", "10.0.0.0/24", "2001:db8::1/64\n"]).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.to_sorted_strings(), vec!["10.0.0.0/24", "2001:db8::/64"]);
    }

    #[test]
    fn test_parse_is_strict() {
        let err = CidrSet::parse(["10.0.0.0/24", "10.0.0.0/99", "10.1.0.0/16"]).unwrap_err();
        assert!(matches!(err, ParseError::InvalidPrefixLength { prefix_len: 99, .. }));

        assert!(CidrSet::parse(["not-a-cidr"]).is_err());
        assert!(CidrSet::parse(Vec::<String>::new()).unwrap().is_empty());
    }

    #[test]
    fn test_insert_and_delete() {
        let mut set = CidrSet::new();
        set.insert([prefix("10.0.0.0/8"), prefix("192.168.1.9/24")]);
        assert!(set.has(&prefix("192.168.1.0/24")));
        assert_eq!(set.len(), 2);

        set.delete([&prefix("192.168.1.200/24"), &prefix("172.16.0.0/12")]);
        assert!(!set.has(&prefix("192.168.1.0/24")));
        assert_eq!(set.to_strings(), vec!["10.0.0.0/8"]);
    }

    #[test]
    fn test_has_all() {
        let set = CidrSet::parse(["10.0.0.0/24", "10.0.1.0/24"]).unwrap();
        assert!(set.has_all([&prefix("10.0.0.1/24"), &prefix("10.0.1.0/24")]));
        assert!(!set.has_all([&prefix("10.0.0.0/24"), &prefix("10.0.2.0/24")]));
        assert!(set.has_all(std::iter::empty()));
    }

    #[test]
    fn test_difference_both_directions() {
        let s1 = CidrSet::parse(["1.0.0.0/8", "2.0.0.0/8", "3.0.0.0/8"]).unwrap();
        let s2 = CidrSet::parse(["1.0.0.0/8", "2.0.0.0/8", "4.0.0.0/8", "5.0.0.0/8"]).unwrap();

        assert_eq!(s1.difference(&s2).to_sorted_strings(), vec!["3.0.0.0/8"]);
        assert_eq!(
            s2.difference(&s1).to_sorted_strings(),
            vec!["4.0.0.0/8", "5.0.0.0/8"]
        );
        // Receiver is untouched.
        assert_eq!(s1.len(), 3);
    }

    #[test]
    fn test_differences_are_disjoint() {
        let a = CidrSet::parse(["10.0.0.0/24", "10.0.1.0/24", "fd00::/64"]).unwrap();
        let b = CidrSet::parse(["10.0.1.5/24", "10.0.9.0/24"]).unwrap();

        let a_minus_b = a.difference(&b);
        let b_minus_a = b.difference(&a);
        assert!(a_minus_b.iter().all(|p| !b_minus_a.has(p)));
        assert!(a_minus_b.iter().all(|p| !b.has(p)));
        assert!(b_minus_a.iter().all(|p| !a.has(p)));
    }

    #[test]
    fn test_superset_and_equal() {
        let big = CidrSet::parse(["10.0.0.0/24", "10.0.1.0/24"]).unwrap();
        let small = CidrSet::parse(["10.0.1.1/24"]).unwrap();
        assert!(big.is_superset(&small));
        assert!(!small.is_superset(&big));
        assert!(!big.equal(&small));

        let same = CidrSet::parse(["10.0.1.0/24", "10.0.0.99/24"]).unwrap();
        assert!(big.equal(&same));
        assert_eq!(big, same);
        assert!(big.difference(&same).is_empty());
        assert!(same.difference(&big).is_empty());
    }

    #[test]
    fn test_empty_sets() {
        let empty = CidrSet::new();
        let one = CidrSet::parse(["10.0.0.0/8"]).unwrap();
        assert!(one.is_superset(&empty));
        assert!(!empty.is_superset(&one));
        assert!(empty.equal(&CidrSet::new()));
        assert_eq!(one.difference(&empty), one);
    }

    #[test]
    fn test_collect_and_display() {
        let set: CidrSet = ["10.0.1.0/24", "10.0.0.0/24"].iter().map(|s| prefix(s)).collect();
        assert_eq!(set.to_string(), "[10.0.0.0/24, 10.0.1.0/24]");
    }
}
