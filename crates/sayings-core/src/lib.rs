use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

mod selection;
mod store;

pub use selection::{CategoryStats, OverallStats, SayingSource, SelectionEngine};
pub use store::{
    AddError, CatalogStore, DuplicateField, KeyValueStorage, LoadReport, LoadSource,
    MemoryStorage, Removal, RemoveError, SaveReport, StorageError, StorageInfo, StoreConfig,
    FORMAT_VERSION,
};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ValidationError {
    #[error("{0} MUST be provided")]
    MissingField(&'static str),
    #[error("{0} MUST be non-empty after trimming")]
    BlankField(&'static str),
    #[error("unknown category: {0}")]
    UnknownCategory(String),
}

/// Tone/register grouping of a saying. The order of [`Category::ALL`] is the
/// shortcut order shown to users (1-based).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Warm,
    Sarcastic,
    Formal,
    Humorous,
    Wise,
}

impl Category {
    pub const COUNT: usize = 5;

    pub const ALL: [Self; Self::COUNT] =
        [Self::Warm, Self::Sarcastic, Self::Formal, Self::Humorous, Self::Wise];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Warm => "warm",
            Self::Sarcastic => "sarcastic",
            Self::Formal => "formal",
            Self::Humorous => "humorous",
            Self::Wise => "wise",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "warm" => Some(Self::Warm),
            "sarcastic" => Some(Self::Sarcastic),
            "formal" => Some(Self::Formal),
            "humorous" => Some(Self::Humorous),
            "wise" => Some(Self::Wise),
            _ => None,
        }
    }

    /// Zero-based slot used by fixed per-category tables.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Warm => 0,
            Self::Sarcastic => 1,
            Self::Formal => 2,
            Self::Humorous => 3,
            Self::Wise => 4,
        }
    }

    /// One-based shortcut number.
    #[must_use]
    pub fn position(self) -> usize {
        self.index() + 1
    }

    #[must_use]
    pub fn from_position(position: usize) -> Option<Self> {
        position.checked_sub(1).and_then(|index| Self::ALL.get(index).copied())
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct SayingId(pub String);

impl SayingId {
    /// Fresh identifier: a ULID (millisecond timestamp followed by 80 random
    /// bits), lowercased.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string().to_lowercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SayingId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SayingId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Saying {
    pub id: SayingId,
    pub text: String,
    pub translation: String,
    pub category: Category,
    pub usage_context: String,
}

impl Saying {
    /// Check the saying against the catalog invariants.
    ///
    /// # Errors
    /// Returns [`ValidationError::BlankField`] when the id, text, translation or
    /// usage context is empty after trimming.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (name, value) in [
            ("id", self.id.as_str()),
            ("text", self.text.as_str()),
            ("translation", self.translation.as_str()),
            ("usageContext", self.usage_context.as_str()),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::BlankField(name));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Case-insensitive content collision on either text or translation.
    #[must_use]
    pub fn collides_with(&self, other: &Self) -> Option<DuplicateField> {
        if self.text.to_lowercase() == other.text.to_lowercase() {
            return Some(DuplicateField::Text);
        }
        if self.translation.to_lowercase() == other.translation.to_lowercase() {
            return Some(DuplicateField::Translation);
        }
        None
    }
}

/// Untyped shape of a persisted record before validation. Every field is
/// optional so that one malformed entry never poisons the whole collection.
#[derive(Debug, Clone, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawSaying {
    pub id: Option<String>,
    pub text: Option<String>,
    pub translation: Option<String>,
    pub category: Option<String>,
    pub usage_context: Option<String>,
}

impl RawSaying {
    /// Parse an untyped record into a validated [`Saying`].
    ///
    /// # Errors
    /// Returns a [`ValidationError`] naming the first missing, blank, or
    /// out-of-set field.
    pub fn into_saying(self) -> Result<Saying, ValidationError> {
        let id = self.id.ok_or(ValidationError::MissingField("id"))?;
        let text = self.text.ok_or(ValidationError::MissingField("text"))?;
        let translation = self.translation.ok_or(ValidationError::MissingField("translation"))?;
        let category_raw = self.category.ok_or(ValidationError::MissingField("category"))?;
        let usage_context =
            self.usage_context.ok_or(ValidationError::MissingField("usageContext"))?;
        let category = Category::parse(&category_raw)
            .ok_or(ValidationError::UnknownCategory(category_raw))?;

        let saying = Saying { id: SayingId(id), text, translation, category, usage_context };
        saying.validate()?;
        Ok(saying)
    }
}

fn default_saying(
    id: &str,
    text: &str,
    translation: &str,
    category: Category,
    usage_context: &str,
) -> Saying {
    Saying {
        id: SayingId::from(id),
        text: text.to_string(),
        translation: translation.to_string(),
        category,
        usage_context: usage_context.to_string(),
    }
}

/// Built-in catalog used whenever persisted data is absent or unusable:
/// three sayings for each category.
#[must_use]
pub fn default_sayings() -> Vec<Saying> {
    vec![
        default_saying(
            "warm_1",
            "Ti voglio bene",
            "I care about you",
            Category::Warm,
            "Use with family and close friends to express deep affection without romantic implications",
        ),
        default_saying(
            "warm_2",
            "Casa dolce casa",
            "Home sweet home",
            Category::Warm,
            "Express comfort and happiness about being home or in a familiar place",
        ),
        default_saying(
            "warm_3",
            "Il cuore non invecchia mai",
            "The heart never grows old",
            Category::Warm,
            "Remind someone that love and passion can last forever, regardless of age",
        ),
        default_saying(
            "sarcastic_1",
            "Meglio tardi che mai",
            "Better late than never",
            Category::Sarcastic,
            "Use sarcastically when someone arrives very late or does something they should have done long ago",
        ),
        default_saying(
            "sarcastic_2",
            "Chi dorme non piglia pesci",
            "Those who sleep don't catch fish",
            Category::Sarcastic,
            "Sarcastically tell someone they need to be more active or they'll miss opportunities",
        ),
        default_saying(
            "sarcastic_3",
            "Tanto va la gatta al lardo che ci lascia lo zampino",
            "The cat goes to the lard so often that it leaves its paw print",
            Category::Sarcastic,
            "Warn someone that their repeated bad behavior will eventually get them caught",
        ),
        default_saying(
            "formal_1",
            "La cortesia è la chiave che apre tutte le porte",
            "Courtesy is the key that opens all doors",
            Category::Formal,
            "Use in professional settings to emphasize the importance of politeness and good manners",
        ),
        default_saying(
            "formal_2",
            "Il rispetto si guadagna con il comportamento",
            "Respect is earned through behavior",
            Category::Formal,
            "Appropriate for business contexts when discussing professional conduct and reputation",
        ),
        default_saying(
            "formal_3",
            "La pazienza è la virtù dei forti",
            "Patience is the virtue of the strong",
            Category::Formal,
            "Use in formal situations to encourage perseverance and dignified waiting",
        ),
        default_saying(
            "humorous_1",
            "Avere le mani bucate",
            "To have holes in your hands",
            Category::Humorous,
            "Jokingly describe someone who spends money too easily or can't save anything",
        ),
        default_saying(
            "humorous_2",
            "Essere al verde",
            "To be in the green",
            Category::Humorous,
            "Humorously say you're broke or have no money left (literally \"to be in the green\")",
        ),
        default_saying(
            "humorous_3",
            "Avere grilli per la testa",
            "To have crickets in your head",
            Category::Humorous,
            "Playfully tease someone about having crazy or unrealistic ideas",
        ),
        default_saying(
            "wise_1",
            "Chi va piano va sano e va lontano",
            "Who goes slowly goes safely and goes far",
            Category::Wise,
            "Advise someone to be patient and steady in their approach to achieve lasting success",
        ),
        default_saying(
            "wise_2",
            "Non è tutto oro quello che luccica",
            "Not everything that glitters is gold",
            Category::Wise,
            "Warn someone not to be deceived by appearances; things aren't always what they seem",
        ),
        default_saying(
            "wise_3",
            "L'esperienza è la madre della saggezza",
            "Experience is the mother of wisdom",
            Category::Wise,
            "Remind someone that wisdom comes from living through various situations and learning from them",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn mk_saying(id: &str, text: &str, translation: &str, usage_context: &str) -> Saying {
        Saying {
            id: SayingId::from(id),
            text: text.to_string(),
            translation: translation.to_string(),
            category: Category::Warm,
            usage_context: usage_context.to_string(),
        }
    }

    fn mk_raw() -> RawSaying {
        RawSaying {
            id: Some("raw_1".to_string()),
            text: Some("In bocca al lupo".to_string()),
            translation: Some("Into the wolf's mouth".to_string()),
            category: Some("wise".to_string()),
            usage_context: Some("Wish someone luck before a test".to_string()),
        }
    }

    #[test]
    fn validate_rejects_whitespace_only_fields() {
        let cases = [
            (mk_saying("a", "   ", "b", "c"), "text"),
            (mk_saying("a", "t", "\t\n", "c"), "translation"),
            (mk_saying("a", "t", "b", " "), "usageContext"),
            (mk_saying(" ", "t", "b", "c"), "id"),
        ];
        for (saying, field) in cases {
            assert_eq!(saying.validate(), Err(ValidationError::BlankField(field)));
            assert!(!saying.is_valid());
        }
    }

    #[test]
    fn validate_accepts_padded_fields() {
        let saying = mk_saying("a", "  Ciao ", " Hello", "Greeting ");
        assert_eq!(saying.validate(), Ok(()));
    }

    #[test]
    fn raw_saying_rejects_unknown_category() {
        let raw = RawSaying { category: Some("angry".to_string()), ..mk_raw() };
        assert_eq!(raw.into_saying(), Err(ValidationError::UnknownCategory("angry".to_string())));
    }

    #[test]
    fn raw_saying_rejects_missing_usage_context() {
        let raw = RawSaying { usage_context: None, ..mk_raw() };
        assert_eq!(raw.into_saying(), Err(ValidationError::MissingField("usageContext")));
    }

    #[test]
    fn raw_saying_parses_camel_case_json() {
        let json = r#"{"id":"x1","text":"Acqua in bocca","translation":"Water in the mouth",
            "category":"humorous","usageContext":"Ask someone to keep a secret"}"#;
        let raw: RawSaying = match serde_json::from_str(json) {
            Ok(raw) => raw,
            Err(err) => panic!("raw record should deserialize: {err}"),
        };
        let saying = match raw.into_saying() {
            Ok(saying) => saying,
            Err(err) => panic!("raw record should validate: {err}"),
        };
        assert_eq!(saying.category, Category::Humorous);
        assert_eq!(saying.usage_context, "Ask someone to keep a secret");
    }

    #[test]
    fn collision_is_case_insensitive_on_text_or_translation() {
        let base = mk_saying("a", "Ti voglio bene", "I care about you", "ctx");
        let same_text = mk_saying("b", "TI VOGLIO BENE", "Something else", "ctx");
        let same_translation = mk_saying("c", "Altro", "i CARE about YOU", "ctx");
        let distinct = mk_saying("d", "Altro", "Other", "ctx");

        assert_eq!(base.collides_with(&same_text), Some(DuplicateField::Text));
        assert_eq!(base.collides_with(&same_translation), Some(DuplicateField::Translation));
        assert_eq!(base.collides_with(&distinct), None);
    }

    #[test]
    fn default_catalog_has_three_valid_sayings_per_category() {
        let defaults = default_sayings();
        assert_eq!(defaults.len(), 15);
        assert!(defaults.iter().all(Saying::is_valid));
        for category in Category::ALL {
            assert_eq!(defaults.iter().filter(|saying| saying.category == category).count(), 3);
        }
        let ids = defaults.iter().map(|saying| saying.id.clone()).collect::<BTreeSet<_>>();
        assert_eq!(ids.len(), defaults.len());
    }

    #[test]
    fn category_positions_follow_shortcut_order() {
        for (index, category) in Category::ALL.into_iter().enumerate() {
            assert_eq!(category.index(), index);
            assert_eq!(Category::from_position(category.position()), Some(category));
            assert_eq!(Category::parse(category.as_str()), Some(category));
        }
        assert_eq!(Category::from_position(0), None);
        assert_eq!(Category::from_position(6), None);
    }

    #[test]
    fn generated_ids_are_distinct() {
        let ids = (0..1_000).map(|_| SayingId::generate()).collect::<BTreeSet<_>>();
        assert_eq!(ids.len(), 1_000);
    }
}
