/// Stable identifier of one annotated item (shared by every rating of it).
/// Example: `X1`, `tg-2025-02-25-00813`
pub type ItemId = String;
/// Identifier of a rater.
/// Examples: `A001`, `adjudicator-3`
pub type AnnotatorId = String;
/// Auxiliary tag drawn from the configured secondary vocabulary.
/// Examples: `scam`, `doxxing`, `self_harm`
pub type SecondaryTag = String;
/// Composite stratum key made of one value per stratification key.
/// Example: `["phishing", "en-hi"]`
pub type StratumKey = Vec<String>;
/// Normalized text used for duplicate detection.
/// Example: `click here to claim your prize`
pub type NormalizedText = String;
/// Name of a record field referenced by a validation violation.
/// Examples: `primary_category`, `confidence`
pub type FieldName = String;
/// Warning/log message text.
/// Example: `ambiguous tone with confidence 0.90 looks contradictory`
pub type LogMessage = String;
