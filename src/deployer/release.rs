//! Release records and the course decision made before every deploy.

use super::manager::ReleaseError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Lifecycle state of a single release revision
///
/// Helm reports these as lower-case strings. Anything we do not recognise is
/// kept as `Unknown` rather than failing the decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseStatus {
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
    Deployed,
    Failed,
    Superseded,
    #[serde(alias = "deleting")]
    Uninstalling,
    #[serde(alias = "deleted")]
    Uninstalled,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ReleaseStatus {
    pub const ALL: [ReleaseStatus; 9] = [
        ReleaseStatus::Unknown,
        ReleaseStatus::PendingInstall,
        ReleaseStatus::PendingUpgrade,
        ReleaseStatus::PendingRollback,
        ReleaseStatus::Deployed,
        ReleaseStatus::Failed,
        ReleaseStatus::Superseded,
        ReleaseStatus::Uninstalling,
        ReleaseStatus::Uninstalled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseStatus::Unknown => "unknown",
            ReleaseStatus::PendingInstall => "pending-install",
            ReleaseStatus::PendingUpgrade => "pending-upgrade",
            ReleaseStatus::PendingRollback => "pending-rollback",
            ReleaseStatus::Deployed => "deployed",
            ReleaseStatus::Failed => "failed",
            ReleaseStatus::Superseded => "superseded",
            ReleaseStatus::Uninstalling => "uninstalling",
            ReleaseStatus::Uninstalled => "uninstalled",
        }
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One revision of a named release, as reported by the release manager
#[derive(Debug, Clone, PartialEq)]
pub struct Release {
    pub name: String,
    pub revision: u32,
    pub status: ReleaseStatus,
    /// Rendered manifest; empty for history entries
    pub manifest: String,
    pub last_deployed: DateTime<Utc>,
}

/// How a deploy attempt will reach the requested state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseCourse {
    /// Release does not exist yet
    Install,
    /// Release exists; upgrade only if the rendered manifest changes
    UpgradeWithDiffCheck,
    /// Release was uninstalled; nothing meaningful to diff against
    Upgrade,
}

impl fmt::Display for ReleaseCourse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseCourse::Install => f.write_str("install"),
            ReleaseCourse::UpgradeWithDiffCheck => f.write_str("upgrade-with-diff-check"),
            ReleaseCourse::Upgrade => f.write_str("upgrade"),
        }
    }
}

/// Decide how to deploy a release
///
/// Rules, first match wins:
/// 1. the status lookup failed with "release not found" → `Install`
/// 2. the last known status is `Uninstalled` → `Upgrade`
/// 3. anything else → `UpgradeWithDiffCheck`
///
/// # Arguments
/// * `release_name` - Only used for logging
/// * `status` - Last known status (`Unknown` when the lookup failed)
/// * `lookup_error` - Error returned by the status lookup, if any
pub fn determine_course(
    release_name: &str,
    status: ReleaseStatus,
    lookup_error: Option<&ReleaseError>,
) -> ReleaseCourse {
    let course = if lookup_error.is_some_and(ReleaseError::is_not_found) {
        ReleaseCourse::Install
    } else if status == ReleaseStatus::Uninstalled {
        ReleaseCourse::Upgrade
    } else {
        ReleaseCourse::UpgradeWithDiffCheck
    };

    debug!(release = %release_name, status = %status, course = %course, "Determined release course");
    course
}

/// Releases with the given status, in input order
pub fn filter_by_status(releases: &[Release], status: ReleaseStatus) -> Vec<&Release> {
    releases.iter().filter(|r| r.status == status).collect()
}

/// Most recently deployed release
///
/// Ties on `last_deployed` are broken by revision so the answer never depends
/// on input order. Returns `None` for empty input.
pub fn latest_release<'a, I>(releases: I) -> Option<&'a Release>
where
    I: IntoIterator<Item = &'a Release>,
{
    releases
        .into_iter()
        .max_by(|a, b| {
            a.last_deployed
                .cmp(&b.last_deployed)
                .then(a.revision.cmp(&b.revision))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn release_at(revision: u32, status: ReleaseStatus, secs: i64) -> Release {
        Release {
            name: "staging-blue-checkout".to_string(),
            revision,
            status,
            manifest: String::new(),
            last_deployed: Utc.timestamp_opt(secs, 0).single().unwrap(),
        }
    }

    fn permutations(items: &[i64]) -> Vec<Vec<i64>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head);
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn test_not_found_installs_for_every_status() {
        let not_found = ReleaseError::NotFound {
            release: "staging-blue-checkout".to_string(),
        };
        for status in ReleaseStatus::ALL {
            assert_eq!(
                determine_course("staging-blue-checkout", status, Some(&not_found)),
                ReleaseCourse::Install,
                "status {status}"
            );
        }
    }

    #[test]
    fn test_uninstalled_upgrades_without_diff() {
        assert_eq!(
            determine_course("x", ReleaseStatus::Uninstalled, None),
            ReleaseCourse::Upgrade
        );
    }

    #[test]
    fn test_other_statuses_diff_check() {
        for status in ReleaseStatus::ALL {
            if status == ReleaseStatus::Uninstalled {
                continue;
            }
            assert_eq!(
                determine_course("x", status, None),
                ReleaseCourse::UpgradeWithDiffCheck,
                "status {status}"
            );
        }
    }

    #[test]
    fn test_other_lookup_errors_do_not_install() {
        let err = ReleaseError::Failed {
            operation: "status",
            message: "connection refused".to_string(),
        };
        assert_eq!(
            determine_course("x", ReleaseStatus::Unknown, Some(&err)),
            ReleaseCourse::UpgradeWithDiffCheck
        );
        assert_eq!(
            determine_course("x", ReleaseStatus::Uninstalled, Some(&err)),
            ReleaseCourse::Upgrade
        );
    }

    #[test]
    fn test_latest_release_ignores_input_order() {
        for order in permutations(&[80, 85, 100, 87, 90]) {
            let releases: Vec<Release> = order
                .iter()
                .enumerate()
                .map(|(i, secs)| release_at(i as u32 + 1, ReleaseStatus::Deployed, *secs))
                .collect();
            let before = releases.clone();

            let latest = latest_release(&releases).unwrap();

            assert_eq!(latest.last_deployed.timestamp(), 100, "order {order:?}");
            assert_eq!(releases, before, "input must not be reordered");
        }
    }

    #[test]
    fn test_latest_release_empty() {
        let releases: Vec<Release> = Vec::new();
        assert!(latest_release(&releases).is_none());
    }

    #[test]
    fn test_latest_release_tie_prefers_higher_revision() {
        let releases = vec![
            release_at(4, ReleaseStatus::Deployed, 50),
            release_at(7, ReleaseStatus::Deployed, 50),
            release_at(5, ReleaseStatus::Deployed, 50),
        ];
        assert_eq!(latest_release(&releases).unwrap().revision, 7);
    }

    #[test]
    fn test_filter_by_status() {
        let releases = vec![
            release_at(1, ReleaseStatus::Deployed, 10),
            release_at(2, ReleaseStatus::Failed, 20),
            release_at(3, ReleaseStatus::Deployed, 30),
        ];

        let deployed = filter_by_status(&releases, ReleaseStatus::Deployed);
        assert_eq!(
            deployed.iter().map(|r| r.revision).collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert!(filter_by_status(&releases, ReleaseStatus::Superseded).is_empty());
        assert!(filter_by_status(&[], ReleaseStatus::Deployed).is_empty());
    }

    #[test]
    fn test_status_decodes_helm_strings() {
        let decode = |s: &str| serde_json::from_value::<ReleaseStatus>(serde_json::json!(s)).unwrap();

        assert_eq!(decode("deployed"), ReleaseStatus::Deployed);
        assert_eq!(decode("pending-upgrade"), ReleaseStatus::PendingUpgrade);
        assert_eq!(decode("uninstalled"), ReleaseStatus::Uninstalled);
        assert_eq!(decode("deleted"), ReleaseStatus::Uninstalled);
        assert_eq!(decode("deleting"), ReleaseStatus::Uninstalling);
        assert_eq!(decode("something-new"), ReleaseStatus::Unknown);
    }
}
