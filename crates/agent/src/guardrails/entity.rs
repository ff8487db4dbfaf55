use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::warn;
use vigil_core::config::GuardrailConfig;
use vigil_core::domain::validation::{FailureDetail, ValidationResult};
use vigil_core::errors::BackendError;

use crate::guardrails::{GuardrailSetupError, ValidationCheck};

pub const PERSON: &str = "PERSON";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityMatch {
    pub entity_type: String,
    /// Byte offsets into the screened text.
    pub start: usize,
    pub end: usize,
}

pub trait Recognizer: Send + Sync {
    fn entity_type(&self) -> &str;
    fn recognize(&self, text: &str) -> Vec<EntityMatch>;
}

/// Flags whole-word, case-insensitive occurrences of configured terms.
#[derive(Clone, Debug)]
pub struct DenylistRecognizer {
    entity_type: String,
    /// `None` when no usable term was configured.
    pattern: Option<Regex>,
}

impl DenylistRecognizer {
    /// Terms are matched literally; whitespace inside a term matches any run of whitespace.
    pub fn new<I, S>(entity_type: impl Into<String>, terms: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut alternatives: Vec<String> = terms
            .into_iter()
            .map(|term| {
                term.as_ref().split_whitespace().map(regex::escape).collect::<Vec<_>>().join(r"\s+")
            })
            .filter(|term| !term.is_empty())
            .collect();
        // Longest first so "apple pie" wins over "apple".
        alternatives.sort_by(|left, right| right.len().cmp(&left.len()).then(left.cmp(right)));
        alternatives.dedup();

        let pattern = if alternatives.is_empty() {
            None
        } else {
            Some(Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|")))?)
        };
        Ok(Self { entity_type: entity_type.into().to_ascii_uppercase(), pattern })
    }
}

impl Recognizer for DenylistRecognizer {
    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    fn recognize(&self, text: &str) -> Vec<EntityMatch> {
        let Some(pattern) = &self.pattern else {
            return Vec::new();
        };
        pattern
            .find_iter(text)
            .map(|found| EntityMatch {
                entity_type: self.entity_type.clone(),
                start: found.start(),
                end: found.end(),
            })
            .collect()
    }
}

const GIVEN_NAMES: &[&str] = &[
    "Aaron", "Adam", "Aisha", "Alex", "Alexander", "Alice", "Amanda", "Amelia", "Amy", "Andrew",
    "Anna", "Anthony", "Benjamin", "Brian", "Carlos", "Charlotte", "Chen", "Chloe", "Christopher",
    "Daniel", "David", "Diego", "Elena", "Elizabeth", "Emily", "Emma", "Eric", "Fatima", "George",
    "Hannah", "Henry", "Isabella", "Jack", "James", "Jane", "Jason", "Jennifer", "Jessica", "John",
    "Jose", "Joseph", "Joshua", "Juan", "Julia", "Karen", "Kevin", "Laura", "Li", "Linda", "Lucas",
    "Lucy", "Maria", "Mary", "Matthew", "Mei", "Michael", "Mohammed", "Muhammad", "Natalie",
    "Nicholas", "Noah", "Olivia", "Oliver", "Omar", "Patricia", "Paul", "Peter", "Priya", "Rachel",
    "Rahul", "Richard", "Robert", "Samuel", "Sarah", "Sofia", "Sophia", "Steven", "Susan", "Thomas",
    "Tom", "Wei", "William", "Yuki", "Zoe",
];

/// Capitalised words that can follow "I am" or an honorific without being names.
const NOT_NAMES: &[&str] = &[
    "i", "a", "an", "the", "fine", "good", "great", "ok", "okay", "happy", "sad", "tired", "sorry",
    "here", "ready", "not", "so", "very", "back", "new", "sure", "glad", "interested", "looking",
    "trying", "going", "feeling", "worried", "hungry", "overweight", "healthy", "sick",
];

static KNOWN_NAME: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(&format!(r"\b(?:{})\b", GIVEN_NAMES.join("|"))));

/// "Dr. Okonkwo", "sir Lee": the honorific is case-insensitive, the name must be capitalised.
static HONORIFIC_NAME: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(
        r"(?i:\b(?:mrs|mr|ms|miss|mx|dr|prof|sir|madam|dame|lady|lord)\b\.?)\s+(\p{Lu}\p{L}*)\b",
    )
});

/// "my name is Ana", "call me Zanele", "I'm Jo".
static INTRODUCED_NAME: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"(?i:\b(?:my\s+name\s+is|call\s+me|i\s+am|i'm|im)\b)\s+(\p{Lu}\p{L}*)\b")
});

/// A capitalised word directly after a name is taken as the surname.
static SURNAME: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^\s+(\p{Lu}\p{L}*)\b"));

fn compiled(pattern: &'static LazyLock<Result<Regex, regex::Error>>) -> Option<&'static Regex> {
    match LazyLock::force(pattern) {
        Ok(regex) => Some(regex),
        Err(error) => {
            warn!(event_name = "guardrails.pattern_invalid", error = %error, "pattern skipped");
            None
        }
    }
}

fn is_name_candidate(word: &str) -> bool {
    !NOT_NAMES.contains(&word.to_lowercase().as_str())
}

/// Recognises personal names from a given-name vocabulary, honorifics ("Dr. Lee") and
/// self-introductions ("my name is Ana"). Candidate names must be capitalised.
#[derive(Clone, Copy, Debug, Default)]
pub struct PersonNameRecognizer;

impl PersonNameRecognizer {
    fn name_spans(text: &str) -> Vec<(usize, usize)> {
        let mut spans: Vec<(usize, usize)> = Vec::new();

        if let Some(known) = compiled(&KNOWN_NAME) {
            spans.extend(known.find_iter(text).map(|found| (found.start(), found.end())));
        }
        for pattern in [&HONORIFIC_NAME, &INTRODUCED_NAME] {
            let Some(pattern) = compiled(pattern) else {
                continue;
            };
            spans.extend(
                pattern
                    .captures_iter(text)
                    .filter_map(|captures| captures.get(1))
                    .filter(|name| is_name_candidate(name.as_str()))
                    .map(|name| (name.start(), name.end())),
            );
        }

        spans.sort_unstable();
        spans.dedup();
        spans
    }

    fn with_surnames(text: &str, mut end: usize) -> usize {
        let Some(surname) = compiled(&SURNAME) else {
            return end;
        };
        while let Some(next) = surname.captures(&text[end..]).and_then(|captures| captures.get(1))
        {
            if !is_name_candidate(next.as_str()) {
                break;
            }
            end += next.end();
        }
        end
    }
}

impl Recognizer for PersonNameRecognizer {
    fn entity_type(&self) -> &str {
        PERSON
    }

    fn recognize(&self, text: &str) -> Vec<EntityMatch> {
        let mut matches: Vec<EntityMatch> = Vec::new();

        for (start, end) in Self::name_spans(text) {
            if matches.last().is_some_and(|last| last.end >= end) {
                continue;
            }
            matches.push(EntityMatch {
                entity_type: PERSON.to_string(),
                start,
                end: Self::with_surnames(text, end),
            });
        }

        matches
    }
}

/// Screens text for sensitive entities, restricted to the configured entity categories.
pub struct EntityScreener {
    recognizers: Vec<Box<dyn Recognizer>>,
    entities: Vec<String>,
}

impl EntityScreener {
    pub fn new<I, S>(entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entities = entities
            .into_iter()
            .map(|entity| entity.as_ref().trim().to_ascii_uppercase())
            .filter(|entity| !entity.is_empty())
            .collect();
        Self { recognizers: Vec::new(), entities }
    }

    pub fn from_config(config: &GuardrailConfig) -> Result<Self, GuardrailSetupError> {
        let denylist = DenylistRecognizer::new(&config.denylist_entity, &config.denylist)
            .map_err(|source| GuardrailSetupError { check: "pii_detect".to_string(), source })?;
        Ok(Self::new(&config.pii_entities)
            .with_recognizer(PersonNameRecognizer)
            .with_recognizer(denylist))
    }

    pub fn with_recognizer<R>(mut self, recognizer: R) -> Self
    where
        R: Recognizer + 'static,
    {
        self.recognizers.push(Box::new(recognizer));
        self
    }

    fn is_enabled(&self, entity_type: &str) -> bool {
        self.entities.iter().any(|entity| entity == entity_type)
    }

    pub fn entities(&self) -> &[String] {
        &self.entities
    }

    /// Every match from an enabled recognizer, ordered by position.
    pub fn analyze(&self, text: &str) -> Vec<EntityMatch> {
        let mut found: Vec<EntityMatch> = self
            .recognizers
            .iter()
            .filter(|recognizer| self.is_enabled(recognizer.entity_type()))
            .flat_map(|recognizer| recognizer.recognize(text))
            .collect();
        found.sort_by_key(|entity| (entity.start, entity.end));
        found
    }

    pub fn screen(&self, text: &str) -> ValidationResult {
        let mut entity_types: Vec<String> = Vec::new();
        for found in self.analyze(text) {
            if !entity_types.contains(&found.entity_type) {
                entity_types.push(found.entity_type);
            }
        }

        if entity_types.is_empty() {
            return ValidationResult::Pass;
        }
        ValidationResult::fail(
            format!("User input contains PII: {}", entity_types.join(", ")),
            FailureDetail::Entities { entity_types },
        )
    }
}

#[async_trait]
impl ValidationCheck for EntityScreener {
    fn name(&self) -> &str {
        "pii_detect"
    }

    async fn check(&self, text: &str) -> Result<ValidationResult, BackendError> {
        Ok(self.screen(text))
    }
}

#[cfg(test)]
mod tests {
    use vigil_core::domain::validation::{FailureDetail, ValidationResult};

    use super::{DenylistRecognizer, EntityScreener, PersonNameRecognizer, Recognizer};

    fn fruit() -> Result<DenylistRecognizer, regex::Error> {
        DenylistRecognizer::new("FRUIT", ["apple", "banana", "orange", "watermelon"])
    }

    fn screener(entities: &[&str]) -> Result<EntityScreener, regex::Error> {
        let screener = EntityScreener::new(entities).with_recognizer(PersonNameRecognizer);
        Ok(screener.with_recognizer(fruit()?))
    }

    fn entity_types(result: &ValidationResult) -> Vec<String> {
        match result.failure().map(|failure| &failure.detail) {
            Some(FailureDetail::Entities { entity_types }) => entity_types.clone(),
            _ => Vec::new(),
        }
    }

    fn spans<'a>(recognizer: &impl Recognizer, text: &'a str) -> Vec<&'a str> {
        recognizer.recognize(text).iter().map(|entity| &text[entity.start..entity.end]).collect()
    }

    #[test]
    fn clean_text_passes() -> Result<(), regex::Error> {
        let result = screener(&["PERSON", "FRUIT"])?.screen("How many steps should I walk a day?");
        assert_eq!(result, ValidationResult::Pass);
        Ok(())
    }

    #[test]
    fn lists_every_distinct_entity_type() -> Result<(), regex::Error> {
        let result =
            screener(&["PERSON", "FRUIT"])?.screen("My name is Olivia and I ate an apple with Tom");

        assert_eq!(entity_types(&result), vec!["PERSON".to_string(), "FRUIT".to_string()]);
        assert_eq!(
            result.failure().map(|failure| failure.reason.as_str()),
            Some("User input contains PII: PERSON, FRUIT")
        );
        Ok(())
    }

    #[test]
    fn disabled_categories_are_not_reported() -> Result<(), regex::Error> {
        let result = screener(&["PERSON"])?.screen("I had a banana for breakfast");
        assert!(result.is_pass());
        Ok(())
    }

    #[test]
    fn denylist_matches_whole_words_case_insensitively() -> Result<(), regex::Error> {
        let recognizer = DenylistRecognizer::new("fruit", ["apple"])?;
        assert_eq!(recognizer.entity_type(), "FRUIT");
        assert_eq!(spans(&recognizer, "An APPLE a day"), vec!["APPLE"]);
        assert!(recognizer.recognize("pineapples and applesauce").is_empty());
        Ok(())
    }

    #[test]
    fn denylist_terms_are_literal_and_prefer_the_longest() -> Result<(), regex::Error> {
        let recognizer =
            DenylistRecognizer::new("HERB", ["apple", "apple  pie", "st. john's wort", " "])?;
        let text = "Apple\tpie or St. John's wort?";
        assert_eq!(spans(&recognizer, text), vec!["Apple\tpie", "St. John's wort"]);
        assert!(recognizer.recognize("Stx John's wort").is_empty());
        assert!(DenylistRecognizer::new("FOOD", ["  "])?.recognize("anything").is_empty());
        Ok(())
    }

    #[test]
    fn honorific_and_introduction_patterns_find_unlisted_names() {
        let text = "Dr. Okonkwo said I should call me Zanele";
        assert_eq!(spans(&PersonNameRecognizer, text), vec!["Okonkwo", "Zanele"]);
    }

    #[test]
    fn surname_is_folded_into_the_same_match() {
        let text = "Please ask Sarah Connor about it";
        assert_eq!(spans(&PersonNameRecognizer, text), vec!["Sarah Connor"]);
    }

    #[test]
    fn lowercase_words_and_states_are_not_names() {
        let found = PersonNameRecognizer.recognize("I am Tired and will mark the date");
        assert!(found.is_empty());
    }

    #[test]
    fn pronoun_after_an_honorific_is_not_a_name() {
        assert!(PersonNameRecognizer.recognize("Thank you sir I feel better").is_empty());
        assert_eq!(spans(&PersonNameRecognizer, "thanks sir Lee"), vec!["Lee"]);
    }
}
