//! Privacy & consent filter.

use crate::anonymize::AnonymizationContext;
use chrono::Duration;
use clinexport_core::{
    AnonymizationLevel, AssessmentRecord, CategoryData, CrisisContent, CrisisRecord, DataCategory,
    EmergencyContact, MoodEntry, Omission, OmissionReason, PrivacyConfiguration, SessionRecord,
    Time, UserConsentRecord, UserId,
};
use std::collections::BTreeSet;
use tracing::debug;

/// Which categories may be read, decided before any storage access.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalPlan {
    /// Categories requested and covered by consent, in export order
    pub allowed: Vec<DataCategory>,
    /// Requested categories dropped for lack of consent
    pub omissions: Vec<Omission>,
}

/// Output of the filter: pruned and anonymized raw data.
#[derive(Debug, Clone)]
pub struct FilteredData {
    /// One payload per surviving category, in export order
    pub datasets: Vec<CategoryData>,
    /// Categories dropped
    pub omissions: Vec<Omission>,
    /// Subject identifier to use downstream
    pub subject: String,
    /// Offset applied to every timestamp, if any
    pub time_offset: Option<Duration>,
    /// Level applied
    pub level: AnonymizationLevel,
}

impl FilteredData {
    /// Payload of a category, if present.
    pub fn dataset(&self, category: DataCategory) -> Option<&CategoryData> {
        self.datasets.iter().find(|d| d.category() == category)
    }
}

/// Applies consent pruning and anonymization.
#[derive(Debug, Default, Clone)]
pub struct PrivacyFilter;

impl PrivacyFilter {
    /// Create a filter.
    pub fn new() -> Self {
        Self
    }

    /// Decide which requested categories may be read.
    pub fn plan(
        &self,
        requested: &BTreeSet<DataCategory>,
        consent: &UserConsentRecord,
    ) -> RetrievalPlan {
        let mut allowed = Vec::new();
        let mut omissions = Vec::new();
        for category in DataCategory::ALL {
            if !requested.contains(&category) {
                continue;
            }
            if consent.covers(category) {
                allowed.push(category);
            } else {
                omissions.push(Omission {
                    category,
                    reason: OmissionReason::ConsentNotGranted,
                });
            }
        }
        RetrievalPlan { allowed, omissions }
    }

    /// Prune by consent and apply the anonymization transforms required by
    /// `privacy`. Categories the consent does not cover are dropped and
    /// recorded as omissions; this is not an error.
    pub fn filter(
        &self,
        data: Vec<CategoryData>,
        requested: &BTreeSet<DataCategory>,
        consent: &UserConsentRecord,
        privacy: &PrivacyConfiguration,
        user_id: &UserId,
        ctx: &mut AnonymizationContext,
    ) -> FilteredData {
        let plan = self.plan(requested, consent);
        let mut datasets: Vec<CategoryData> = data
            .into_iter()
            .filter(|d| plan.allowed.contains(&d.category()))
            .collect();
        datasets.sort_by_key(|d| d.category());

        let level = privacy.anonymization.level;
        let transforms = Transforms::from_privacy(privacy);
        let subject = if transforms.replace_identifiers {
            ctx.pseudonym().to_string()
        } else {
            user_id.to_string()
        };

        let mut omissions = plan.omissions;
        if transforms.coarsen_crisis && withhold_crisis_responses(&mut datasets) > 0 {
            omissions.push(Omission {
                category: DataCategory::Assessments,
                reason: OmissionReason::CrisisWithheld,
            });
        }

        if level != AnonymizationLevel::None {
            datasets = datasets
                .into_iter()
                .map(|d| transforms.apply(d, &subject, ctx))
                .collect();
        }

        debug!(
            "Filtered {} categories at {} anonymization, {} omitted",
            datasets.len(),
            level,
            omissions.len()
        );

        FilteredData {
            datasets,
            omissions,
            subject,
            time_offset: transforms.shift_time.then(|| ctx.time_offset()),
            level,
        }
    }
}

/// Effective switches derived from a privacy configuration.
#[derive(Debug, Clone, Copy)]
struct Transforms {
    replace_identifiers: bool,
    shift_time: bool,
    generalize: bool,
    drop_free_text: bool,
    add_noise: bool,
    coarsen_crisis: bool,
}

impl Transforms {
    fn from_privacy(privacy: &PrivacyConfiguration) -> Self {
        Self {
            replace_identifiers: privacy.replaces_identifiers(),
            shift_time: privacy.shifts_time(),
            generalize: privacy.generalizes(),
            drop_free_text: privacy.generalizes() || privacy.data_minimization,
            add_noise: privacy.adds_noise(),
            coarsen_crisis: privacy.coarsens_crisis(),
        }
    }

    fn apply(&self, data: CategoryData, subject: &str, ctx: &mut AnonymizationContext) -> CategoryData {
        match data {
            CategoryData::Assessments(records) => CategoryData::Assessments(
                records
                    .into_iter()
                    .map(|r| self.assessment(r, subject, ctx))
                    .collect(),
            ),
            CategoryData::MoodTracking(records) => CategoryData::MoodTracking(
                records.into_iter().map(|r| self.mood(r, subject, ctx)).collect(),
            ),
            CategoryData::MbctProgress(records) => CategoryData::MbctProgress(
                records
                    .into_iter()
                    .map(|r| self.session(r, subject, ctx))
                    .collect(),
            ),
            CategoryData::CrisisSafety(records) => CategoryData::CrisisSafety(
                records.into_iter().map(|r| self.crisis(r, subject, ctx)).collect(),
            ),
        }
    }

    fn id(&self, id: String, ctx: &AnonymizationContext) -> String {
        if self.replace_identifiers {
            ctx.pseudonymize_record_id(&id)
        } else {
            id
        }
    }

    fn owner(&self, user_id: UserId, subject: &str) -> UserId {
        if self.replace_identifiers {
            UserId::new(subject)
        } else {
            user_id
        }
    }

    fn time(&self, t: Option<Time>, ctx: &AnonymizationContext) -> Option<Time> {
        t.map(|t| {
            let t = if self.shift_time { ctx.shift(t) } else { t };
            if self.generalize {
                AnonymizationContext::generalize(t)
            } else {
                t
            }
        })
    }

    fn text(&self, text: Option<String>) -> Option<String> {
        if self.drop_free_text {
            None
        } else {
            text
        }
    }

    // Questionnaire answers are discrete instrument items: they are never
    // perturbed, so totals and crisis cutoffs stay exact.
    fn assessment(&self, r: AssessmentRecord, subject: &str, ctx: &mut AnonymizationContext) -> AssessmentRecord {
        AssessmentRecord {
            id: self.id(r.id, ctx),
            user_id: self.owner(r.user_id, subject),
            completed_at: self.time(r.completed_at, ctx),
            ..r
        }
    }

    fn mood(&self, r: MoodEntry, subject: &str, ctx: &mut AnonymizationContext) -> MoodEntry {
        let (mood, energy, anxiety) = if self.add_noise {
            (
                ctx.noisy_scale(r.mood, 1.0, 10.0),
                r.energy.map(|v| ctx.noisy_scale(v, 1.0, 10.0)),
                r.anxiety.map(|v| ctx.noisy_scale(v, 1.0, 10.0)),
            )
        } else {
            (r.mood, r.energy, r.anxiety)
        };
        MoodEntry {
            id: self.id(r.id, ctx),
            user_id: self.owner(r.user_id, subject),
            mood,
            energy,
            anxiety,
            notes: self.text(r.notes),
            recorded_at: self.time(r.recorded_at, ctx),
        }
    }

    fn session(&self, r: SessionRecord, subject: &str, ctx: &mut AnonymizationContext) -> SessionRecord {
        let duration_minutes = if self.add_noise {
            ctx.noisy_duration(r.duration_minutes)
        } else {
            r.duration_minutes
        };
        SessionRecord {
            id: self.id(r.id, ctx),
            user_id: self.owner(r.user_id, subject),
            duration_minutes,
            notes: self.text(r.notes),
            started_at: self.time(r.started_at, ctx),
            ..r
        }
    }

    // Crisis content is never noise-injected. Research exports reduce it to
    // a coarse risk category regardless of the other switches.
    fn crisis(&self, r: CrisisRecord, subject: &str, ctx: &mut AnonymizationContext) -> CrisisRecord {
        let content = if self.coarsen_crisis {
            CrisisContent::Coarse {
                risk: r.risk_category(),
            }
        } else if self.replace_identifiers {
            redact_contacts(r.content.clone())
        } else {
            r.content.clone()
        };
        CrisisRecord {
            id: self.id(r.id, ctx),
            user_id: self.owner(r.user_id, subject),
            content,
            recorded_at: self.time(r.recorded_at, ctx),
        }
    }
}

/// Drop questionnaire responses at a crisis threshold and return how many
/// were dropped.
fn withhold_crisis_responses(datasets: &mut [CategoryData]) -> usize {
    let mut withheld = 0;
    for data in datasets.iter_mut() {
        if let CategoryData::Assessments(records) = data {
            let before = records.len();
            records.retain(|r| !r.reaches_crisis_threshold());
            withheld += before - records.len();
        }
    }
    withheld
}

fn redact_contacts(content: CrisisContent) -> CrisisContent {
    match content {
        CrisisContent::Detailed {
            risk_score,
            suicidal_ideation,
            safety_plan,
        } => CrisisContent::Detailed {
            risk_score,
            suicidal_ideation,
            safety_plan: safety_plan.map(|mut plan| {
                plan.emergency_contacts = plan
                    .emergency_contacts
                    .iter()
                    .enumerate()
                    .map(|(i, _)| EmergencyContact {
                        name: format!("Contact {}", i + 1),
                        phone: "[redacted]".to_string(),
                    })
                    .collect();
                plan
            }),
        },
        coarse => coarse,
    }
}
