//! Version gate deciding whether a reconcile pass starts an upgrade
//!
//! Pure and side-effect free. A `true` answer is advisory; an error means the
//! operator is older than what is deployed and the pass must stop before
//! touching status.

use std::cmp::Ordering;

use semver::Version;
use tracing::error;

use crate::error::{Error, Result};

/// Decide whether moving from `current` to `target` is an upgrade
///
/// * never while the initial deployment is still running (`deploying`)
/// * never when the strings are identical
/// * always when nothing has been observed yet (`current` empty)
/// * by semantic-version comparison when both parse (a leading `v` is ignored)
/// * otherwise, for unequal strings that do not parse, always
pub fn should_take_update_path(target: &str, current: &str, deploying: bool) -> Result<bool> {
    if deploying {
        return Ok(false);
    }
    if target == current {
        return Ok(false);
    }
    if current.is_empty() {
        return Ok(true);
    }

    let (Some(target_version), Some(current_version)) = (parse(target), parse(current)) else {
        return Ok(true);
    };

    match compare(&target_version, &current_version) {
        Ordering::Less => {
            error!(
                current = %current_version,
                target = %target_version,
                "operator downgraded, will not reconcile"
            );
            Err(Error::DowngradeRejected {
                current: current.to_string(),
                target: target.to_string(),
            })
        }
        Ordering::Equal => Ok(false),
        Ordering::Greater => Ok(true),
    }
}

fn parse(version: &str) -> Option<Version> {
    Version::parse(version.strip_prefix('v').unwrap_or(version)).ok()
}

/// Precedence order; build metadata does not take part
fn compare(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor, a.patch)
        .cmp(&(b.major, b.minor, b.patch))
        .then_with(|| a.pre.cmp(&b.pre))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploying_never_upgrades() {
        assert!(!should_take_update_path("v2.0.0", "v1.0.0", true).unwrap());
        assert!(!should_take_update_path("v1.0.0", "v2.0.0", true).unwrap());
        assert!(!should_take_update_path("devel", "", true).unwrap());
    }

    #[test]
    fn test_identical_versions_never_upgrade() {
        for v in ["v1.10.0", "1.10.0", "devel", "devel1.9.5", ""] {
            assert!(!should_take_update_path(v, v, false).unwrap(), "{v}");
        }
    }

    #[test]
    fn test_increasing_semver_upgrades() {
        assert!(should_take_update_path("v1.10.0", "v1.9.5", false).unwrap());
        assert!(should_take_update_path("1.10.0", "1.9.5", false).unwrap());
    }

    #[test]
    fn test_no_previous_version_upgrades() {
        assert!(should_take_update_path("1.9.5", "", false).unwrap());
    }

    #[test]
    fn test_downgrade_is_rejected() {
        let err = should_take_update_path("v1.9.5", "v1.10.0", false).unwrap_err();
        assert!(matches!(err, Error::DowngradeRejected { .. }));
        assert!(should_take_update_path("1.9.5", "1.10.0", false).is_err());
    }

    #[test]
    fn test_prefix_only_difference_is_not_an_upgrade() {
        assert!(!should_take_update_path("v1.2.3", "1.2.3", false).unwrap());
    }

    #[test]
    fn test_unparseable_versions_fall_back_to_upgrade() {
        assert!(should_take_update_path("v1.9.5", "devel", false).unwrap());
        assert!(should_take_update_path("1.9.5", "devel", false).unwrap());
        assert!(should_take_update_path("devel", "v1.9.5", false).unwrap());
    }

    #[test]
    fn test_prerelease_orders_before_release() {
        assert!(should_take_update_path("v1.0.0", "v1.0.0-rc.1", false).unwrap());
        assert!(should_take_update_path("v1.0.0-rc.1", "v1.0.0", false).is_err());
    }

    #[test]
    fn test_build_metadata_is_ignored() {
        assert!(!should_take_update_path("v1.0.0+build.2", "v1.0.0+build.1", false).unwrap());
    }
}
