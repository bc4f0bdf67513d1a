use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::CurationError;
use crate::splits::SplitLabel;

pub use crate::types::{AnnotatorId, ItemId, SecondaryTag};

/// Declares a closed string vocabulary with serde, `Display`, and `FromStr`.
macro_rules! vocabulary {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            /// Every value in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Wire representation.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                match raw {
                    $($wire => Ok($name::$variant),)+
                    other => Err(format!(
                        "'{}' is not a valid {}",
                        other,
                        stringify!($name)
                    )),
                }
            }
        }
    };
}

vocabulary! {
    /// Mutually exclusive primary label.
    Category {
        /// The benign category.
        Safe => "safe",
        /// Credential or payment lures.
        Phishing => "phishing",
        /// Malicious software or links to it.
        Malware => "malware",
        /// Attacks on protected groups.
        HateSpeech => "hate_speech",
        /// Targeted harassment of individuals.
        Cyberbullying => "cyberbullying",
        /// Sexual material.
        SexualContent => "sexual_content",
        /// Threats or depictions of violence.
        Violence => "violence",
    }
}

vocabulary! {
    /// Ordinal harm severity (`Low < Medium < High`).
    Severity {
        /// Minor harm.
        Low => "low",
        /// Moderate harm.
        Medium => "medium",
        /// Serious harm.
        High => "high",
    }
}

vocabulary! {
    /// Language of the content, including code-mixed variants.
    LanguageTag {
        /// English.
        English => "en",
        /// Hindi.
        Hindi => "hi",
        /// Hinglish.
        EnglishHindi => "en-hi",
        /// Telugu.
        Telugu => "te",
        /// Tenglish.
        EnglishTelugu => "en-te",
        /// Any other language.
        Other => "other",
    }
}

vocabulary! {
    /// Channel the content was collected from.
    ContentContext {
        /// Social media post.
        SocialMedia => "social_media",
        /// Email.
        Email => "email",
        /// Comment thread.
        Comment => "comment",
        /// Direct message.
        Message => "message",
        /// Forum post.
        Forum => "forum",
        /// Product or service review.
        Review => "review",
        /// Chat conversation.
        Chat => "chat",
        /// Any other channel.
        Other => "other",
    }
}

vocabulary! {
    /// How a canonical record was resolved from its annotations.
    ResolutionMethod {
        /// Every rater agreed.
        Unanimous => "unanimous",
        /// A strict majority agreed.
        Majority => "majority",
        /// An independent adjudication decided.
        TieBreak => "tie_break",
        /// Only one rater judged the item.
        SingleRater => "single_rater",
    }
}

impl Category {
    /// The benign category.
    pub const BENIGN: Category = Category::Safe;

    /// True for the single benign category.
    pub fn is_benign(&self) -> bool {
        *self == Self::BENIGN
    }
}

/// Boolean annotation flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationFlags {
    /// Content exposes personal or identifying details.
    #[serde(default)]
    pub contains_identifying_info: bool,
    /// Judgment depends on context missing from the record.
    #[serde(default)]
    pub requires_additional_context: bool,
    /// Tone could be read either way.
    #[serde(default)]
    pub is_ambiguous_tone: bool,
}

impl AnnotationFlags {
    /// Field-wise OR.
    pub fn union(self, other: AnnotationFlags) -> AnnotationFlags {
        AnnotationFlags {
            contains_identifying_info: self.contains_identifying_info
                || other.contains_identifying_info,
            requires_additional_context: self.requires_additional_context
                || other.requires_additional_context,
            is_ambiguous_tone: self.is_ambiguous_tone || other.is_ambiguous_tone,
        }
    }
}

/// One annotator's judgment of one item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawAnnotation {
    /// Content item being rated.
    pub item_id: ItemId,
    /// Rater who produced this judgment.
    pub annotator_id: AnnotatorId,
    /// Content under review.
    #[serde(default)]
    pub text: String,
    /// Source URL, if the content has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Main harm category.
    pub primary_category: Category,
    /// Finer-grained tags from the configured vocabulary.
    #[serde(default)]
    pub secondary_tags: BTreeSet<SecondaryTag>,
    /// Absent or `low` for benign records; required otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    /// Language of the content.
    pub language_tag: LanguageTag,
    /// Channel the content came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContentContext>,
    /// Annotator's self-reported certainty in `[0, 1]`.
    pub confidence: f64,
    /// Quality flags.
    #[serde(default)]
    pub flags: AnnotationFlags,
    /// Free-text annotator note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Marks the independent rating requested to break a tie.
    #[serde(default)]
    pub adjudication: bool,
    /// When the rating was made.
    pub created_at: DateTime<Utc>,
}

/// One validated, merged, corpus-ready row.
///
/// Immutable after creation except for the split assignment, which is set
/// once by the splitter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Content item.
    pub item_id: ItemId,
    /// Content text.
    pub text: String,
    /// Source URL, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Resolved harm category.
    pub primary_category: Category,
    /// Union of adopted raters' tags.
    pub secondary_tags: BTreeSet<SecondaryTag>,
    /// Resolved severity.
    pub severity: Option<Severity>,
    /// Majority language among adopted raters.
    pub language_tag: LanguageTag,
    /// Majority context among adopted raters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContentContext>,
    /// Mean confidence of adopted raters.
    pub confidence: f64,
    /// Field-wise OR of adopted raters' flags.
    pub flags: AnnotationFlags,
    /// Distinct adopted notes joined with `; `.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Earliest `created_at` among contributing annotations.
    pub created_at: DateTime<Utc>,
    /// Every rater of the item, in arrival order.
    pub contributing_annotator_ids: Vec<AnnotatorId>,
    /// `None` when only one annotation existed.
    pub agreement_score: Option<f64>,
    /// How the category was decided.
    pub resolution_method: ResolutionMethod,
    pub(crate) split_assignment: Option<SplitLabel>,
}

impl CanonicalRecord {
    /// Split the record was assigned to, if any.
    pub fn split_assignment(&self) -> Option<SplitLabel> {
        self.split_assignment
    }

    /// Set the split label; a record can be assigned only once.
    pub fn assign_split(&mut self, label: SplitLabel) -> Result<(), CurationError> {
        if self.split_assignment.is_some() {
            return Err(CurationError::SplitAlreadyAssigned {
                item_id: self.item_id.clone(),
            });
        }
        self.split_assignment = Some(label);
        Ok(())
    }

    /// Text used for duplicate detection (URL when the text is empty).
    pub fn content(&self) -> &str {
        if self.text.trim().is_empty() {
            self.url.as_deref().unwrap_or("")
        } else {
            &self.text
        }
    }
}
