use anyhow::{Result, bail};
use std::collections::HashSet;

use crate::quota::QuotaLimits;
use crate::resource::ResourceVector;

/// Validate a Kubernetes-style resource name.
/// Rules: lowercase `[a-z0-9-]`, max 63 chars, no leading/trailing hyphens.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > 63 {
        bail!("name '{}' exceeds 63 characters (got {})", name, name.len());
    }
    if name.starts_with('-') || name.ends_with('-') {
        bail!("name '{}' must not start or end with a hyphen", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        bail!(
            "name '{}' must contain only lowercase letters, digits, and hyphens [a-z0-9-]",
            name
        );
    }
    Ok(())
}

/// `min[r] <= max[r]` for every resource named by both.
pub fn validate_quota_limits(limits: &QuotaLimits) -> Result<()> {
    let Some(max) = &limits.max else {
        return Ok(());
    };
    for (name, min) in limits.min.iter() {
        if max.contains(name) && min > max.get(name) {
            bail!(
                "min quota must be less than or equal to max quota: {} min {} > max {}",
                name,
                min,
                max.get(name)
            );
        }
    }
    Ok(())
}

/// Composite namespaces: non-empty, valid names, no duplicates.
pub fn validate_namespaces(namespaces: &[String]) -> Result<()> {
    if namespaces.is_empty() {
        bail!("namespaces must not be empty");
    }
    let mut seen = HashSet::new();
    for ns in namespaces {
        validate_name(ns)?;
        if !seen.insert(ns.as_str()) {
            bail!("namespace '{}' is listed more than once", ns);
        }
    }
    Ok(())
}

pub fn validate_min(min: &ResourceVector) -> Result<()> {
    if min.is_empty() {
        bail!("min must define at least one resource");
    }
    Ok(())
}
