//! Detection triage.
//!
//! Turns the raw observations for one sampled frame into at most one `Finding` per
//! alertable class, using a static class-id to severity table.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::config::ClassSettings;
use crate::detect::Observation;

const UNKNOWN_CLASS_NAME: &str = "Unknown";

/// Alert priority of a class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Ignored,
}

impl Severity {
    pub fn is_alertable(self) -> bool {
        !matches!(self, Severity::Ignored)
    }
}

/// Static class table: names plus the Critical and Warning partitions.
#[derive(Clone, Debug)]
pub struct SeverityTable {
    names: HashMap<u32, String>,
    severities: HashMap<u32, Severity>,
    person_class_id: u32,
}

impl SeverityTable {
    pub fn from_settings(settings: &ClassSettings) -> Self {
        let mut severities = HashMap::new();
        for &id in &settings.warning {
            severities.insert(id, Severity::Warning);
        }
        // Critical wins if a misconfigured id lands in both sets.
        for &id in &settings.critical {
            severities.insert(id, Severity::Critical);
        }
        Self {
            names: settings
                .names
                .iter()
                .map(|(id, name)| (*id, name.clone()))
                .collect(),
            severities,
            person_class_id: settings.person_class_id,
        }
    }

    pub fn severity(&self, class_id: u32) -> Severity {
        self.severities
            .get(&class_id)
            .copied()
            .unwrap_or(Severity::Ignored)
    }

    pub fn name(&self, class_id: u32) -> &str {
        self.names
            .get(&class_id)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_CLASS_NAME)
    }

    pub fn is_person(&self, class_id: u32) -> bool {
        class_id == self.person_class_id
    }
}

/// Best-confidence detection of one alertable class within one sampled frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Finding {
    pub class_id: u32,
    pub class_name: String,
    pub severity: Severity,
    pub confidence: f32,
    /// Person-class observations at or above threshold in the same frame.
    pub person_count: u32,
    /// Configured default; not measured.
    pub area_sqm: f64,
}

/// Per-frame classifier. Stateless apart from its configuration.
#[derive(Clone, Debug)]
pub struct Classifier {
    table: SeverityTable,
    threshold: f32,
    default_area_sqm: f64,
}

impl Classifier {
    pub fn new(table: SeverityTable, threshold: f32, default_area_sqm: f64) -> Self {
        Self {
            table,
            threshold,
            default_area_sqm,
        }
    }

    pub fn table(&self) -> &SeverityTable {
        &self.table
    }

    /// Classify one frame's observations.
    ///
    /// Findings come back Critical first, then by descending confidence.
    pub fn classify(&self, observations: &[Observation]) -> Vec<Finding> {
        let mut person_count = 0u32;
        let mut best_by_class: BTreeMap<&str, (u32, Severity, f32)> = BTreeMap::new();

        for obs in observations {
            if !obs.confidence.is_finite() || obs.confidence < self.threshold {
                continue;
            }
            if self.table.is_person(obs.class_id) {
                person_count += 1;
            }
            let severity = self.table.severity(obs.class_id);
            if !severity.is_alertable() {
                continue;
            }
            let name = self.table.name(obs.class_id);
            best_by_class
                .entry(name)
                .and_modify(|best| {
                    if obs.confidence > best.2 {
                        *best = (obs.class_id, severity, obs.confidence);
                    }
                })
                .or_insert((obs.class_id, severity, obs.confidence));
        }

        let mut findings: Vec<Finding> = best_by_class
            .into_iter()
            .map(|(name, (class_id, severity, confidence))| Finding {
                class_id,
                class_name: name.to_string(),
                severity,
                confidence,
                person_count,
                area_sqm: self.default_area_sqm,
            })
            .collect();
        findings.sort_by(|a, b| {
            a.severity
                .cmp(&b.severity)
                .then(b.confidence.total_cmp(&a.confidence))
        });
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERSON: u32 = 0;
    const WEAPON: u32 = 1;
    const FIRE: u32 = 2;
    const CROWD: u32 = 5;
    const WALKING: u32 = 11;

    fn classifier(threshold: f32) -> Classifier {
        let table = SeverityTable::from_settings(&ClassSettings::default());
        Classifier::new(table, threshold, 50.0)
    }

    #[test]
    fn best_confidence_per_class_with_person_count() {
        let findings = classifier(0.5).classify(&[
            Observation::new(WEAPON, 0.9),
            Observation::new(WEAPON, 0.6),
            Observation::new(PERSON, 0.99),
        ]);
        assert_eq!(
            findings,
            vec![Finding {
                class_id: WEAPON,
                class_name: "weapon".to_string(),
                severity: Severity::Critical,
                confidence: 0.9,
                person_count: 1,
                area_sqm: 50.0,
            }]
        );
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        let findings = classifier(0.5).classify(&[
            Observation::new(FIRE, 0.5),
            Observation::new(CROWD, 0.4999),
        ]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].class_name, "fire");
        assert_eq!(findings[0].confidence, 0.5);
    }

    #[test]
    fn below_threshold_persons_are_not_counted() {
        let findings = classifier(0.5).classify(&[
            Observation::new(PERSON, 0.3),
            Observation::new(PERSON, 0.7),
            Observation::new(PERSON, 0.8),
            Observation::new(CROWD, 0.75),
        ]);
        assert_eq!(findings[0].person_count, 2);
        assert_eq!(findings[0].severity, Severity::Warning);
    }

    #[test]
    fn ignored_classes_never_become_findings() {
        let findings = classifier(0.1).classify(&[
            Observation::new(PERSON, 0.99),
            Observation::new(WALKING, 0.99),
            Observation::new(99, 0.99),
        ]);
        assert!(findings.is_empty());
    }

    #[test]
    fn non_finite_confidence_is_dropped() {
        let findings = classifier(0.0).classify(&[Observation::new(WEAPON, f32::NAN)]);
        assert!(findings.is_empty());
    }

    #[test]
    fn critical_findings_sort_before_warnings() {
        let findings = classifier(0.5).classify(&[
            Observation::new(CROWD, 0.95),
            Observation::new(FIRE, 0.6),
            Observation::new(WEAPON, 0.7),
        ]);
        let order: Vec<&str> = findings.iter().map(|f| f.class_name.as_str()).collect();
        assert_eq!(order, vec!["weapon", "fire", "crowd"]);
    }

    #[test]
    fn at_most_one_finding_per_class_for_varied_inputs() {
        let c = classifier(0.5);
        for n in 1..20u32 {
            let observations: Vec<Observation> = (0..n)
                .map(|i| Observation::new(i % 4 + 1, 0.5 + (i as f32) / 100.0))
                .collect();
            let findings = c.classify(&observations);
            let mut names: Vec<&str> = findings.iter().map(|f| f.class_name.as_str()).collect();
            names.sort_unstable();
            names.dedup();
            assert_eq!(names.len(), findings.len());
            for finding in &findings {
                let max = observations
                    .iter()
                    .filter(|o| o.class_id == finding.class_id)
                    .map(|o| o.confidence)
                    .fold(f32::MIN, f32::max);
                assert_eq!(finding.confidence, max);
            }
        }
    }

    #[test]
    fn unnamed_alertable_class_is_reported_as_unknown() {
        let mut settings = ClassSettings::default();
        settings.critical.push(42);
        let c = Classifier::new(SeverityTable::from_settings(&settings), 0.5, 10.0);
        let findings = c.classify(&[Observation::new(42, 0.8)]);
        assert_eq!(findings[0].class_name, "Unknown");
        assert_eq!(findings[0].area_sqm, 10.0);
    }
}
