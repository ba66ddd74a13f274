//! Keyword heuristics shared by the decision engine, synthesizer and
//! assembler
//!
//! Every rule is data: a table of category -> keywords, evaluated by the
//! same few functions. Adding a rule means adding a row.

use std::collections::HashSet;

/// Category -> keywords. Evaluation order is table order.
pub type KeywordTable = &'static [(&'static str, &'static [&'static str])];

/// Lowercased text with punctuation folded to single spaces and padded, so
/// phrase lookups respect word boundaries.
#[derive(Debug, Clone)]
pub struct NormalizedText {
    padded: String,
}

impl NormalizedText {
    pub fn new(text: &str) -> Self {
        Self {
            padded: format!(" {} ", normalize(text)),
        }
    }

    /// Keywords of four or more characters match word prefixes ("invoice"
    /// finds "invoices"); shorter ones must match whole words.
    pub fn has(&self, keyword: &str) -> bool {
        let kw = normalize(keyword);
        if kw.is_empty() {
            return false;
        }
        if kw.len() >= 4 {
            self.padded.contains(&format!(" {}", kw))
        } else {
            self.padded.contains(&format!(" {} ", kw))
        }
    }

    /// Whole-word (or whole-phrase) match regardless of keyword length
    pub fn has_word(&self, keyword: &str) -> bool {
        let kw = normalize(keyword);
        !kw.is_empty() && self.padded.contains(&format!(" {} ", kw))
    }

    pub fn count_hits(&self, keywords: &[&str]) -> usize {
        keywords.iter().filter(|k| self.has(k)).count()
    }

    pub fn has_any(&self, keywords: &[&str]) -> bool {
        keywords.iter().any(|k| self.has(k))
    }

    pub fn as_str(&self) -> &str {
        self.padded.trim()
    }
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '+' && c != '#')
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Every category with at least one hit, in table order.
pub fn detect_all(text: &NormalizedText, table: KeywordTable) -> Vec<&'static str> {
    table
        .iter()
        .filter(|(_, keywords)| text.has_any(keywords))
        .map(|(category, _)| *category)
        .collect()
}

/// Category with the most hits; earlier rows win ties.
pub fn detect_best(text: &NormalizedText, table: KeywordTable) -> Option<&'static str> {
    let mut best: Option<(&'static str, usize)> = None;
    for (category, keywords) in table {
        let hits = text.count_hits(keywords);
        if hits > 0 && best.map(|(_, b)| hits > b).unwrap_or(true) {
            best = Some((*category, hits));
        }
    }
    best.map(|(c, _)| c)
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "into", "our", "their", "are", "was",
    "were", "will", "can", "should", "would", "have", "has", "had", "not", "but", "all", "any",
    "each", "every", "via", "using", "use", "when", "then", "than", "them", "they", "who", "what",
    "which", "where", "how", "need", "needs", "want", "wants", "also", "more", "less", "some",
    "per", "out", "its", "it's", "you", "your", "about", "over", "under", "between",
];

/// Content words (length > 2, at least one letter, not stopwords) for
/// overlap measures.
pub fn significant_words(text: &str) -> HashSet<String> {
    normalize(text)
        .split(' ')
        .filter(|w| w.len() > 2 && w.chars().any(char::is_alphabetic) && !STOPWORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

/// |a ∩ b| / |a ∪ b|, 0 when both are empty.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Lowercased, trimmed, de-duplicated set
pub fn lower_set<'a>(items: impl IntoIterator<Item = &'a String>) -> HashSet<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Canonical technology names and the phrases that mention them
pub const TECH_CATALOG: KeywordTable = &[
    ("Python", &["python"]),
    ("Node.js", &["node js", "nodejs"]),
    ("Java", &["java"]),
    ("FastAPI", &["fastapi"]),
    ("Django", &["django"]),
    ("PostgreSQL", &["postgres", "postgresql"]),
    ("MySQL", &["mysql"]),
    ("MongoDB", &["mongodb", "mongo"]),
    ("Redis", &["redis"]),
    ("Kafka", &["kafka"]),
    ("RabbitMQ", &["rabbitmq"]),
    ("Celery", &["celery"]),
    ("Airflow", &["airflow"]),
    ("Docker", &["docker"]),
    ("Kubernetes", &["kubernetes", "k8s"]),
    ("AWS Lambda", &["lambda"]),
    ("AWS S3", &["s3"]),
    ("Azure Functions", &["azure functions"]),
    ("Salesforce", &["salesforce"]),
    ("SAP", &["sap"]),
    ("ServiceNow", &["servicenow"]),
    ("Zendesk", &["zendesk"]),
    ("Slack", &["slack"]),
    ("Microsoft Teams", &["microsoft teams", "ms teams"]),
    ("Twilio", &["twilio"]),
    ("Stripe", &["stripe"]),
    ("QuickBooks", &["quickbooks"]),
    ("Workday", &["workday"]),
    ("UiPath", &["uipath"]),
    ("Power Automate", &["power automate"]),
    ("Zapier", &["zapier"]),
    ("LangChain", &["langchain"]),
    ("OpenAI API", &["openai", "gpt"]),
    ("Tesseract OCR", &["tesseract"]),
    ("Elasticsearch", &["elasticsearch"]),
    ("Snowflake", &["snowflake"]),
    ("Tableau", &["tableau"]),
    ("Power BI", &["power bi"]),
    ("SharePoint", &["sharepoint"]),
    ("Google Sheets", &["google sheets"]),
    ("Excel", &["excel"]),
];

/// Technologies mentioned in free text, in catalogue order. Names are
/// matched as whole words: "java" must not fire on "javascript".
pub fn extract_technologies(text: &NormalizedText) -> Vec<String> {
    TECH_CATALOG
        .iter()
        .filter(|(_, phrases)| phrases.iter().any(|p| text.has_word(p)))
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Work that needs hands in the physical world
pub const PHYSICAL_TASK_KEYWORDS: &[&str] = &[
    "physically",
    "by hand",
    "lift",
    "carry boxes",
    "move furniture",
    "clean the",
    "cleaning",
    "mop",
    "vacuum",
    "paint the",
    "plumbing",
    "repair the",
    "fix the roof",
    "cook meals",
    "cooking",
    "drive the",
    "deliver packages",
    "walk the dog",
    "mow the lawn",
    "harvest",
    "assemble furniture",
    "haircut",
    "massage",
];

pub fn is_physical_task(text: &NormalizedText) -> bool {
    text.has_any(PHYSICAL_TASK_KEYWORDS)
}

/// Phrases that raise implementation complexity
pub const COMPLEXITY_KEYWORDS: &[&str] = &[
    "complex",
    "legacy",
    "mainframe",
    "unstructured",
    "handwritten",
    "multi system",
    "multiple systems",
    "real time",
    "negotiat",
    "judgment",
    "judgement",
    "exception handling",
    "ambiguous",
];

/// Compliance regimes and their severity weight
pub const COMPLIANCE_SEVERITY: &[(&str, f64)] = &[
    ("hipaa", 0.2),
    ("pci", 0.2),
    ("pci-dss", 0.2),
    ("gdpr", 0.15),
    ("sox", 0.15),
    ("fedramp", 0.2),
    ("ccpa", 0.1),
    ("iso27001", 0.05),
    ("soc2", 0.05),
];

/// Severity of a compliance label; unknown regimes count as moderate.
pub fn compliance_severity(label: &str) -> f64 {
    let lower = label.trim().to_lowercase();
    COMPLIANCE_SEVERITY
        .iter()
        .find(|(name, _)| lower == *name || lower.replace(['-', ' ', '_'], "") == name.replace('-', ""))
        .map(|(_, s)| *s)
        .unwrap_or(0.1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: KeywordTable = &[
        ("billing", &["invoice", "payment"]),
        ("support", &["ticket", "customer", "complaint"]),
    ];

    #[test]
    fn test_word_boundaries() {
        let t = NormalizedText::new("We need AI to triage the details");
        assert!(t.has("ai"));
        assert!(!t.has("tai"));
        let t = NormalizedText::new("Check the detail view");
        assert!(!t.has("ai"));
    }

    #[test]
    fn test_prefix_match_for_long_keywords() {
        let t = NormalizedText::new("Reconcile invoices nightly");
        assert!(t.has("invoice"));
        assert!(t.has("reconcil"));
    }

    #[test]
    fn test_detect_best_prefers_more_hits() {
        let t = NormalizedText::new("customer ticket about an invoice");
        assert_eq!(detect_best(&t, TABLE), Some("support"));
        assert_eq!(detect_all(&t, TABLE), vec!["billing", "support"]);
        assert_eq!(detect_best(&NormalizedText::new("nothing relevant"), TABLE), None);
    }

    #[test]
    fn test_extract_technologies() {
        let t = NormalizedText::new("Sync Salesforce leads into PostgreSQL with Python");
        let techs = extract_technologies(&t);
        assert_eq!(techs, vec!["Python", "PostgreSQL", "Salesforce"]);
    }

    #[test]
    fn test_technologies_need_whole_words() {
        let t = NormalizedText::new("An excellent javascript dashboard shared by several teams");
        assert!(extract_technologies(&t).is_empty());

        let t = NormalizedText::new("Export Excel sheets from the Java service to MS Teams");
        assert_eq!(extract_technologies(&t), vec!["Java", "Microsoft Teams", "Excel"]);
    }

    #[test]
    fn test_physical_task() {
        assert!(is_physical_task(&NormalizedText::new("Someone must physically move pallets")));
        assert!(!is_physical_task(&NormalizedText::new("Route emails to the right team")));
    }

    #[test]
    fn test_significant_words_and_jaccard() {
        let a = significant_words("Process the invoices from email");
        assert!(a.contains("invoices"));
        assert!(!a.contains("the"));
        let b = significant_words("invoices arrive by email");
        assert!(jaccard(&a, &b) > 0.0);
        assert_eq!(jaccard(&HashSet::new(), &HashSet::new()), 0.0);
    }

    #[test]
    fn test_numbers_are_not_content_words() {
        assert!(significant_words("1234 5678 90 12").is_empty());
        let w = significant_words("Upload 500 invoices to SAP4");
        assert!(w.contains("sap4"));
        assert!(!w.contains("500"));
    }

    #[test]
    fn test_compliance_severity() {
        assert_eq!(compliance_severity("HIPAA"), 0.2);
        assert_eq!(compliance_severity("PCI DSS"), 0.2);
        assert_eq!(compliance_severity("internal policy"), 0.1);
    }
}
