//! Workload classification and per-profile resource footprints

use crate::models::{Footprint, NODE_FIELDS};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkloadProfile {
    Video,
    NetworkHeavy,
    DiskHeavy,
    Default,
}

impl WorkloadProfile {
    pub const fn as_str(self) -> &'static str {
        match self {
            WorkloadProfile::Video => "video",
            WorkloadProfile::NetworkHeavy => "network-heavy",
            WorkloadProfile::DiskHeavy => "disk-heavy",
            WorkloadProfile::Default => "default",
        }
    }
}

impl fmt::Display for WorkloadProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pods whose name contains `pattern` get `profile`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRule {
    pub pattern: String,
    pub profile: WorkloadProfile,
    pub footprint: Footprint,
}

impl ProfileRule {
    fn new(pattern: &str, profile: WorkloadProfile, footprint: Footprint) -> Self {
        Self {
            pattern: pattern.to_string(),
            profile,
            footprint,
        }
    }
}

/// Ordered classification rules plus the footprint of unmatched pods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileTable {
    pub rules: Vec<ProfileRule>,
    pub default_footprint: Footprint,
}

impl Default for ProfileTable {
    fn default() -> Self {
        Self {
            rules: vec![
                ProfileRule::new(
                    "video",
                    WorkloadProfile::Video,
                    [100.0, 23.0, 11.25, 2.49, 0.0, 1.54],
                ),
                ProfileRule::new(
                    "net",
                    WorkloadProfile::NetworkHeavy,
                    [54.0, 46.2, 80.04, 71.4, 0.0, 1.58],
                ),
                ProfileRule::new(
                    "disk",
                    WorkloadProfile::DiskHeavy,
                    [100.0, 22.96, 12.6, 2.73, 0.0, 86.26],
                ),
            ],
            default_footprint: [0.0; NODE_FIELDS],
        }
    }
}

impl ProfileTable {
    /// Footprint of the first rule for `profile`, or the default footprint
    pub fn footprint(&self, profile: WorkloadProfile) -> Footprint {
        self.rules
            .iter()
            .find(|r| r.profile == profile)
            .map_or(self.default_footprint, |r| r.footprint)
    }
}

/// Maps a pod name to a workload profile
pub trait WorkloadClassifier: Send + Sync {
    fn classify(&self, pod: &str) -> WorkloadProfile;
}

/// First rule whose pattern occurs in the pod name wins
#[derive(Debug, Clone)]
pub struct SubstringClassifier {
    rules: Vec<(String, WorkloadProfile)>,
}

impl SubstringClassifier {
    pub fn from_table(table: &ProfileTable) -> Self {
        Self {
            rules: table
                .rules
                .iter()
                .map(|r| (r.pattern.clone(), r.profile))
                .collect(),
        }
    }
}

impl WorkloadClassifier for SubstringClassifier {
    fn classify(&self, pod: &str) -> WorkloadProfile {
        self.rules
            .iter()
            .find(|(pattern, _)| pod.contains(pattern.as_str()))
            .map_or(WorkloadProfile::Default, |(_, profile)| *profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_classification_order() {
        let classifier = SubstringClassifier::from_table(&ProfileTable::default());
        assert_eq!(classifier.classify("video-transcode-7f9"), WorkloadProfile::Video);
        assert_eq!(classifier.classify("nginx-net-01"), WorkloadProfile::NetworkHeavy);
        assert_eq!(classifier.classify("disk-bench"), WorkloadProfile::DiskHeavy);
        // "video" is checked before "disk"
        assert_eq!(classifier.classify("video-disk"), WorkloadProfile::Video);
        assert_eq!(classifier.classify("redis-0"), WorkloadProfile::Default);
    }

    #[test]
    fn test_footprints() {
        let table = ProfileTable::default();
        assert_eq!(
            table.footprint(WorkloadProfile::DiskHeavy),
            [100.0, 22.96, 12.6, 2.73, 0.0, 86.26]
        );
        assert_eq!(table.footprint(WorkloadProfile::Default), [0.0; NODE_FIELDS]);
    }

    #[test]
    fn test_table_from_config_json() {
        let json = r#"{
            "rules": [
                {"pattern": "ffmpeg", "profile": "video", "footprint": [90, 20, 10, 2, 0, 1]}
            ]
        }"#;
        let table: ProfileTable = serde_json::from_str(json).unwrap();
        let classifier = SubstringClassifier::from_table(&table);
        assert_eq!(classifier.classify("ffmpeg-worker"), WorkloadProfile::Video);
        assert_eq!(classifier.classify("video-1"), WorkloadProfile::Default);
        assert_eq!(table.footprint(WorkloadProfile::Video)[0], 90.0);
        assert_eq!(table.default_footprint, [0.0; NODE_FIELDS]);
    }
}
