//! Derived-field enrichment from built-in lookup tables.
//!
//! The stage copies `payload` into `enriched_payload` and adds whatever it
//! can infer: names, age bands, email provider, geography, job class and a
//! handful of estimates. A `_metadata` block records which rules fired, a
//! confidence score for the estimated fields, and the lookup tables used.

use crate::{
    config::EnrichmentSettings,
    error::StageResult,
    exec_ctx::ExecCtx,
    record::{DerivedKey, Record},
    stage::{BoxFut, Stage},
    stages::value_text,
    types::RequestKind,
};
use chrono::{Datelike, NaiveDate, Utc};
use serde_json::{json, Map, Value};
use tracing::debug;

const NAME: &str = "enrichment";
const VERSION: &str = "2.0";

const PERSONAL_EMAIL_DOMAINS: [(&str, &str); 8] = [
    ("gmail.com", "Google"),
    ("yahoo.com", "Yahoo"),
    ("outlook.com", "Microsoft"),
    ("hotmail.com", "Microsoft"),
    ("icloud.com", "Apple"),
    ("qq.com", "Tencent"),
    ("163.com", "NetEase"),
    ("sina.com", "Sina"),
];

struct Geo {
    continent: &'static str,
    timezone: &'static str,
    currency: &'static str,
    country_code: &'static str,
    language: &'static str,
}

fn geo_lookup(country: &str) -> Option<Geo> {
    let geo = match country {
        "USA" => Geo {
            continent: "North America",
            timezone: "UTC-5",
            currency: "USD",
            country_code: "US",
            language: "English",
        },
        "China" => Geo {
            continent: "Asia",
            timezone: "UTC+8",
            currency: "CNY",
            country_code: "CN",
            language: "Chinese",
        },
        "Germany" => Geo {
            continent: "Europe",
            timezone: "UTC+1",
            currency: "EUR",
            country_code: "DE",
            language: "German",
        },
        "Japan" => Geo {
            continent: "Asia",
            timezone: "UTC+9",
            currency: "JPY",
            country_code: "JP",
            language: "Japanese",
        },
        "United Kingdom" => Geo {
            continent: "Europe",
            timezone: "UTC+0",
            currency: "GBP",
            country_code: "GB",
            language: "English",
        },
        _ => return None,
    };
    Some(geo)
}

fn city_lookup(city: &str) -> Option<Value> {
    let (population, area_km2) = match city {
        "New York" => (8_400_000, 783),
        "Beijing" => (21_540_000, 16_411),
        "London" => (8_982_000, 1_572),
        "Tokyo" => (13_960_000, 2_194),
        _ => return None,
    };
    Some(json!({ "population": population, "area_km2": area_km2 }))
}

fn company_lookup(company: &str) -> Option<Value> {
    let (founded, headquarters) = match company {
        "Google" => (1998, "Mountain View, CA"),
        "Microsoft" => (1975, "Redmond, WA"),
        "Apple" => (1976, "Cupertino, CA"),
        _ => return None,
    };
    Some(json!({
        "industry": "Technology",
        "size": "Large",
        "founded": founded,
        "headquarters": headquarters,
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobCategory {
    Technology,
    Management,
    SalesMarketing,
    Other,
}

impl JobCategory {
    fn classify(title: &str) -> Self {
        let title = title.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| title.contains(w));
        if has(&["engineer", "developer", "programmer"]) {
            JobCategory::Technology
        } else if has(&["manager", "director", "executive"]) {
            JobCategory::Management
        } else if has(&["sales", "marketing"]) {
            JobCategory::SalesMarketing
        } else {
            JobCategory::Other
        }
    }

    fn label(&self) -> &'static str {
        match self {
            JobCategory::Technology => "Technology",
            JobCategory::Management => "Management",
            JobCategory::SalesMarketing => "Sales & Marketing",
            JobCategory::Other => "Other",
        }
    }

    fn is_leadership(&self) -> bool {
        matches!(self, JobCategory::Management)
    }

    fn skills(&self) -> &'static [&'static str] {
        match self {
            JobCategory::Technology => &["programming", "problem_solving"],
            JobCategory::Management => &["leadership", "communication"],
            JobCategory::SalesMarketing => &["communication", "persuasion"],
            JobCategory::Other => &["general"],
        }
    }

    fn base_income(&self) -> (f64, f64) {
        match self {
            JobCategory::Technology => (60_000.0, 150_000.0),
            JobCategory::Management => (80_000.0, 200_000.0),
            JobCategory::SalesMarketing => (40_000.0, 120_000.0),
            JobCategory::Other => (30_000.0, 80_000.0),
        }
    }
}

fn age_category(age: f64) -> &'static str {
    match age {
        a if a < 13.0 => "child",
        a if a < 20.0 => "teenager",
        a if a < 35.0 => "young_adult",
        a if a < 55.0 => "middle_aged",
        a if a < 65.0 => "senior",
        _ => "elderly",
    }
}

fn generation(birth_year: f64) -> &'static str {
    match birth_year {
        y if y >= 2010.0 => "Gen Alpha",
        y if y >= 1997.0 => "Gen Z",
        y if y >= 1981.0 => "Millennial",
        y if y >= 1965.0 => "Gen X",
        y if y >= 1946.0 => "Baby Boomer",
        _ => "Silent Generation",
    }
}

fn zodiac_sign(month: u32, day: u32) -> &'static str {
    const ENDS: [(u32, u32, &str); 12] = [
        (1, 20, "Capricorn"),
        (2, 19, "Aquarius"),
        (3, 21, "Pisces"),
        (4, 20, "Aries"),
        (5, 21, "Taurus"),
        (6, 21, "Gemini"),
        (7, 23, "Cancer"),
        (8, 23, "Leo"),
        (9, 23, "Virgo"),
        (10, 23, "Libra"),
        (11, 22, "Scorpio"),
        (12, 22, "Sagittarius"),
    ];
    ENDS.iter()
        .find(|(m, d, _)| month < *m || (month == *m && day <= *d))
        .map(|(_, _, sign)| *sign)
        .unwrap_or("Capricorn")
}

fn season(month: u32) -> &'static str {
    match month {
        12 | 1 | 2 => "Winter",
        3..=5 => "Spring",
        6..=8 => "Summer",
        _ => "Fall",
    }
}

/// `1234567` -> `"1,234,567"`.
fn thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn income_range(category: JobCategory, age: f64) -> String {
    let (low, high) = category.base_income();
    let factor = (1.0 + (age - 25.0) * 0.02).min(1.5);
    format!(
        "${} - ${}",
        thousands((low * factor) as i64),
        thousands((high * factor) as i64)
    )
}

fn experience_years(category: JobCategory, age: f64) -> i64 {
    let max_years = (age as i64 - 22).max(0);
    if category.is_leadership() {
        max_years.min((max_years - 5).max(5))
    } else {
        max_years
    }
}

/// Working state for one record.
struct Enrichment {
    data: Map<String, Value>,
    rules: Vec<&'static str>,
    confidence: Map<String, Value>,
    sources: Vec<&'static str>,
    reference_year: i32,
}

impl Enrichment {
    fn text(&self, key: &str) -> Option<String> {
        self.data.get(key).map(value_text)
    }

    fn number(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(Value::as_f64)
    }

    fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.data.insert(key.to_string(), value.into());
    }

    fn personal(&mut self) {
        if let (Some(first), Some(last)) = (self.text("first_name"), self.text("last_name")) {
            self.set("full_name", format!("{} {}", first, last));
            self.rules.push("full_name_generation");
            self.confidence.insert("full_name".into(), json!(1.0));
        }

        if let Some(full) = self.text("full_name") {
            let parts: Vec<&str> = full.split_whitespace().collect();
            if parts.len() >= 2 {
                let initials: String = parts
                    .iter()
                    .filter_map(|p| p.chars().next())
                    .flat_map(char::to_uppercase)
                    .collect();
                self.set("initials", initials);
                self.rules.push("initials_generation");
            }
        }

        if let Some(age) = self.number("age") {
            self.set("age_category", age_category(age));
            self.set("generation", generation(self.reference_year as f64 - age));
            self.rules.extend(["age_categorization", "generation_classification"]);
        }

        if let Some(birth) = self.text("birth_date") {
            // Unparsable dates still count as analysed; they just add nothing.
            if let Ok(date) = NaiveDate::parse_from_str(&birth, "%Y-%m-%d") {
                self.set("birth_month", date.month());
                self.set("birth_day", date.day());
                self.set("zodiac_sign", zodiac_sign(date.month(), date.day()));
                self.set("birth_season", season(date.month()));
            }
            self.rules.push("birth_date_analysis");
        }
    }

    fn contact(&mut self) {
        if let Some(email) = self.text("email") {
            if let Some((_, domain)) = email.split_once('@') {
                let domain = domain.to_lowercase();
                let provider = PERSONAL_EMAIL_DOMAINS
                    .iter()
                    .find(|(d, _)| *d == domain)
                    .map(|(_, p)| *p);
                self.set("email_provider", provider.unwrap_or("Other"));
                self.set("is_business_email", provider.is_none());
                self.set("email_domain", domain);
                self.rules.extend([
                    "email_domain_extraction",
                    "email_provider_classification",
                    "business_email_detection",
                ]);
            }
        }

        if let Some(phone) = self.text("phone") {
            let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
            let detected = match digits.len() {
                10 => {
                    let mobile = digits.starts_with(['3', '4', '5', '6', '7', '8', '9']);
                    Some(("US", if mobile { "mobile" } else { "landline" }))
                }
                11 if digits.starts_with('1') => Some(("US", "mobile")),
                13 if digits.starts_with("86") => {
                    let mobile = digits[2..].starts_with('1');
                    Some(("China", if mobile { "mobile" } else { "landline" }))
                }
                _ => None,
            };
            if let Some((country, kind)) = detected {
                self.set("phone_country", country);
                self.set("phone_type", kind);
            }
            self.rules.push("phone_analysis");
        }
    }

    fn geographic(&mut self) {
        let country = self.text("country");

        if let Some(geo) = country.as_deref().and_then(geo_lookup) {
            self.set(
                "geo_info",
                json!({
                    "continent": geo.continent,
                    "timezone": geo.timezone,
                    "currency": geo.currency,
                    "country_code": geo.country_code,
                    "language": geo.language,
                }),
            );
            self.set("continent", geo.continent);
            self.set("timezone", geo.timezone);
            self.set("currency", geo.currency);
            self.set("country_code", geo.country_code);
            self.rules.push("geo_enrichment");
            self.sources.push("internal_geo_database");
        }

        if let Some(info) = self.text("city").as_deref().and_then(city_lookup) {
            self.set("city_info", info);
            self.rules.push("city_enrichment");
        }

        if let Some(postal) = self.text("postal_code") {
            let prefix: String = postal.chars().take(2).collect();
            let info = match country.as_deref() {
                Some("US" | "USA") if postal.chars().count() == 5 => Some(json!({
                    "postal_type": "ZIP",
                    "region": format!("US-{}", prefix),
                })),
                Some("China" | "CN") if postal.chars().count() == 6 => Some(json!({
                    "postal_type": "China Postal",
                    "province_code": prefix,
                })),
                _ => None,
            };
            if let Some(info) = info {
                self.set("postal_info", info);
                self.rules.push("postal_code_analysis");
            }
        }
    }

    fn professional(&mut self) {
        let job = self.text("job_title").map(|t| JobCategory::classify(&t));
        let age = self.number("age");

        if let (Some(category), Some(age)) = (job, age) {
            self.set("estimated_income_range", income_range(category, age));
            self.rules.push("income_estimation");
            self.confidence.insert("estimated_income_range".into(), json!(0.6));
        }

        if let Some(category) = job {
            self.set("job_category", category.label());
            self.set(
                "job_level",
                if category.is_leadership() { "leadership" } else { "professional" },
            );
            self.set("skills_required", category.skills().to_vec());
            self.rules.push("job_classification");
        }

        if let Some(info) = self.text("company").as_deref().and_then(company_lookup) {
            self.set("company_info", info);
            self.rules.push("company_enrichment");
            self.sources.push("company_database");
        }

        if let (Some(category), Some(age)) = (job, age) {
            self.set("estimated_experience_years", experience_years(category, age));
            self.rules.push("experience_estimation");
        }
    }

    fn behavioral(&mut self) {
        if let Some(tz) = self.text("timezone") {
            self.set(
                "predicted_active_hours",
                json!({
                    "morning": "8:00-10:00",
                    "afternoon": "14:00-16:00",
                    "evening": "19:00-21:00",
                    "timezone": tz,
                }),
            );
            self.rules.push("active_hours_prediction");
        }

        let job = self.text("job_title").map(|t| JobCategory::classify(&t));
        if let (Some(age), Some(category)) = (self.number("age"), job) {
            let mut prefs = Map::new();
            if age < 30.0 {
                prefs.insert("communication".into(), json!(["social_media", "messaging"]));
                prefs.insert("shopping".into(), json!(["online", "mobile"]));
            } else {
                prefs.insert("communication".into(), json!(["email", "phone"]));
                prefs.insert("shopping".into(), json!(["online", "in_store"]));
            }
            match category {
                JobCategory::Technology => {
                    prefs.insert("content".into(), json!(["tech_news", "tutorials"]));
                }
                JobCategory::Management => {
                    prefs.insert("content".into(), json!(["business_news", "leadership"]));
                }
                _ => {}
            }
            self.set("predicted_preferences", prefs);
            self.rules.push("preference_prediction");
        }
    }

    fn finish(mut self) -> (Value, usize) {
        let applied = self.rules.len();
        let metadata = json!({
            "processed_at": Utc::now().to_rfc3339(),
            "processor": NAME,
            "version": VERSION,
            "enrichment_rules_applied": self.rules,
            "confidence_scores": self.confidence,
            "data_sources": self.sources,
        });
        self.data.insert("_metadata".into(), metadata);
        (Value::Object(self.data), applied)
    }
}

/// Writes `enriched_payload`: the submitted fields plus derived ones.
///
/// Generation cohorts are computed against a reference year, the current
/// year unless one is configured.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentStage {
    reference_year: Option<i32>,
}

impl EnrichmentStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &EnrichmentSettings) -> Self {
        Self {
            reference_year: settings.reference_year,
        }
    }

    /// Pin the year used for generation cohorts.
    pub fn with_reference_year(mut self, year: i32) -> Self {
        self.reference_year = Some(year);
        self
    }
}

impl Stage for EnrichmentStage {
    fn kind(&self) -> RequestKind {
        RequestKind::Enrichment
    }

    fn name(&self) -> &str {
        NAME
    }

    fn apply<'a>(&'a self, _ctx: &'a ExecCtx, record: &'a mut Record) -> BoxFut<'a, StageResult<()>> {
        Box::pin(async move {
            let mut work = Enrichment {
                data: record.business_payload().cloned().unwrap_or_default(),
                rules: Vec::new(),
                confidence: Map::new(),
                sources: Vec::new(),
                reference_year: self.reference_year.unwrap_or_else(|| Utc::now().year()),
            };
            work.personal();
            work.contact();
            work.geographic();
            work.professional();
            work.behavioral();

            let (enriched, applied) = work.finish();
            debug!(applied, "enrichment done");
            record.insert_derived(DerivedKey::Enriched, enriched);
            record.info(NAME, format!("applied {} enrichment rules", applied));
            Ok(())
        })
    }
}
