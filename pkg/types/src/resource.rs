use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{Add, AddAssign};
use tracing::warn;

use pkg_constants::resources::{
    RESOURCE_CPU, RESOURCE_EPHEMERAL_STORAGE, RESOURCE_MEMORY, RESOURCE_PODS,
};

use crate::quantity::{format_milli, parse_quantity};

// --- Resource names ---

/// Name of a resource dimension.
///
/// The four non-scalar dimensions get their own variants; everything else
/// (device plugins, partitioned GPUs, `gpu-memory`) is an opaque scalar.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceName {
    /// CPU, stored in milli-units.
    Cpu,
    /// Memory, in bytes.
    Memory,
    Pods,
    /// Ephemeral storage, in bytes.
    EphemeralStorage,
    Scalar(String),
}

impl ResourceName {
    pub fn as_str(&self) -> &str {
        match self {
            ResourceName::Cpu => RESOURCE_CPU,
            ResourceName::Memory => RESOURCE_MEMORY,
            ResourceName::Pods => RESOURCE_PODS,
            ResourceName::EphemeralStorage => RESOURCE_EPHEMERAL_STORAGE,
            ResourceName::Scalar(name) => name,
        }
    }

    pub fn scalar(name: &str) -> Self {
        ResourceName::from(name)
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, ResourceName::Scalar(_))
    }
}

impl From<&str> for ResourceName {
    fn from(name: &str) -> Self {
        match name {
            RESOURCE_CPU => ResourceName::Cpu,
            RESOURCE_MEMORY => ResourceName::Memory,
            RESOURCE_PODS => ResourceName::Pods,
            RESOURCE_EPHEMERAL_STORAGE => ResourceName::EphemeralStorage,
            other => ResourceName::Scalar(other.to_string()),
        }
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Resource vector ---

/// A named, extensible mapping from resource name to integer quantity.
///
/// A dimension that is absent reads as zero, but presence is kept: comparisons
/// against a limit only look at the dimensions the limit declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceVector {
    values: BTreeMap<ResourceName, i64>,
}

impl ResourceVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero-valued vector declaring every name in `names`.
    pub fn zeros<'a>(names: impl IntoIterator<Item = &'a ResourceName>) -> Self {
        Self {
            values: names.into_iter().map(|n| (n.clone(), 0)).collect(),
        }
    }

    /// Builder-style setter, handy for literals in tests and config.
    pub fn with(mut self, name: impl Into<ResourceName>, value: i64) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<ResourceName>, value: i64) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &ResourceName) -> i64 {
        self.values.get(name).copied().unwrap_or(0)
    }

    pub fn contains(&self, name: &ResourceName) -> bool {
        self.values.contains_key(name)
    }

    pub fn remove(&mut self, name: &ResourceName) -> Option<i64> {
        self.values.remove(name)
    }

    pub fn milli_cpu(&self) -> i64 {
        self.get(&ResourceName::Cpu)
    }

    pub fn memory(&self) -> i64 {
        self.get(&ResourceName::Memory)
    }

    pub fn pods(&self) -> i64 {
        self.get(&ResourceName::Pods)
    }

    pub fn ephemeral_storage(&self) -> i64 {
        self.get(&ResourceName::EphemeralStorage)
    }

    pub fn scalar(&self, name: &str) -> i64 {
        self.get(&ResourceName::from(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &ResourceName> {
        self.values.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceName, i64)> {
        self.values.iter().map(|(k, v)| (k, *v))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_zero(&self) -> bool {
        self.values.values().all(|v| *v == 0)
    }

    /// Componentwise sum over the union of both name sets.
    pub fn sum(&self, other: &ResourceVector) -> ResourceVector {
        let mut out = self.clone();
        out += other;
        out
    }

    /// Componentwise `max(0, self - other)` over the union of both name sets.
    pub fn sub_non_negative(&self, other: &ResourceVector) -> ResourceVector {
        let mut out = self.clone();
        for (name, value) in &other.values {
            let entry = out.values.entry(name.clone()).or_insert(0);
            *entry = entry.saturating_sub(*value).max(0);
        }
        for value in out.values.values_mut() {
            *value = (*value).max(0);
        }
        out
    }

    /// Componentwise maximum over the union of both name sets.
    pub fn max(&self, other: &ResourceVector) -> ResourceVector {
        let mut out = self.clone();
        for (name, value) in &other.values {
            let entry = out.values.entry(name.clone()).or_insert(*value);
            *entry = (*entry).max(*value);
        }
        out
    }

    /// True if every dimension declared by `limit` is `<=` the limit.
    /// Dimensions absent from `limit` are not constrained.
    pub fn fits_within(&self, limit: &ResourceVector) -> bool {
        limit
            .values
            .iter()
            .all(|(name, max)| self.get(name) <= *max)
    }

    /// True if any dimension declared by `limit` is `>` the limit.
    pub fn exceeds(&self, limit: &ResourceVector) -> bool {
        !self.fits_within(limit)
    }

    /// Keep only the dimensions declared by `other`, reading absent ones as zero.
    pub fn restricted_to(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector {
            values: other
                .values
                .keys()
                .map(|name| (name.clone(), self.get(name)))
                .collect(),
        }
    }

    /// Keep only the dimensions whose name is in `names`.
    pub fn projected_on(&self, names: &BTreeSet<ResourceName>) -> ResourceVector {
        ResourceVector {
            values: self
                .values
                .iter()
                .filter(|(k, _)| names.contains(*k))
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }

    /// Total order used to rank requests by magnitude: lexicographic over the
    /// sorted union of names, absent reading as zero. If `a <= b` componentwise
    /// then `a <= b` here too.
    pub fn magnitude_cmp(&self, other: &ResourceVector) -> Ordering {
        let names: BTreeSet<&ResourceName> = self.values.keys().chain(other.values.keys()).collect();
        for name in names {
            match self.get(name).cmp(&other.get(name)) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl AddAssign<&ResourceVector> for ResourceVector {
    fn add_assign(&mut self, other: &ResourceVector) {
        for (name, value) in &other.values {
            let entry = self.values.entry(name.clone()).or_insert(0);
            *entry = entry.saturating_add(*value);
        }
    }
}

impl Add<&ResourceVector> for &ResourceVector {
    type Output = ResourceVector;

    fn add(self, other: &ResourceVector) -> ResourceVector {
        self.sum(other)
    }
}

impl FromIterator<(ResourceName, i64)> for ResourceVector {
    fn from_iter<I: IntoIterator<Item = (ResourceName, i64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for ResourceVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match name {
                ResourceName::Cpu => write!(f, "{}: {}", name, format_milli(*value))?,
                _ => write!(f, "{}: {}", name, value)?,
            }
        }
        f.write_str("}")
    }
}

// --- Serialization ---
//
// On the wire a vector is a resource list: `{"cpu": "500m", "memory": "1Gi", "nvidia.com/gpu": 1}`.
// Malformed quantities decode as zero for that dimension.

impl Serialize for ResourceVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in &self.values {
            match name {
                ResourceName::Cpu => map.serialize_entry(name.as_str(), &format_milli(*value))?,
                _ => map.serialize_entry(name.as_str(), value)?,
            }
        }
        map.end()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawQuantity {
    Int(i64),
    Float(f64),
    Text(String),
}

impl<'de> Deserialize<'de> for ResourceVector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: BTreeMap<String, RawQuantity> = BTreeMap::deserialize(deserializer)?;
        let mut out = ResourceVector::new();
        for (key, quantity) in raw {
            let name = ResourceName::from(key.as_str());
            let milli = name == ResourceName::Cpu;
            let value = match quantity {
                RawQuantity::Int(v) if v >= 0 => Some(if milli { v.saturating_mul(1000) } else { v }),
                RawQuantity::Int(_) => None,
                RawQuantity::Float(v) => parse_quantity(&v.to_string(), milli),
                RawQuantity::Text(s) => parse_quantity(&s, milli),
            };
            let value = value.unwrap_or_else(|| {
                warn!("Malformed quantity for resource {}, treating as zero", key);
                0
            });
            out.set(name, value);
        }
        Ok(out)
    }
}
