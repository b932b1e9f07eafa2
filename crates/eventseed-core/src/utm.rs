use rand::Rng;

const CAMPAIGNS: &[&str] = &["Qrr", "Krr", "q2promo", "q3promo", "wordonthefuture"];

const MEDIUMS: &[(&str, &[&str])] = &[
    (
        "social",
        &[
            "LinkedIn",
            "Twitter",
            "Facebook",
            "Instagram",
            "Snapchat",
            "Reddit",
        ],
    ),
    ("search", &["google", "bing", "duckduckgo"]),
    ("newsletter", &["issue12", "issue6"]),
];

const TERMS: &[&str] = &["[UK]", "[US]", "[JP]"];

const CONTENTS: &[&str] = &["b2b", "b2c", "enterprise", "retail"];

/// One set of marketing parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtmParams {
    pub campaign: String,
    pub medium: String,
    pub source: String,
    pub term: String,
    pub content: String,
}

impl UtmParams {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let (medium, sources) = MEDIUMS[rng.random_range(0..MEDIUMS.len())];
        Self {
            campaign: choose(CAMPAIGNS, rng).to_string(),
            medium: medium.to_string(),
            source: choose(sources, rng).to_string(),
            term: choose(TERMS, rng).to_string(),
            content: choose(CONTENTS, rng).to_string(),
        }
    }

    /// Parameter names and values in attribute order.
    pub fn pairs(&self) -> [(&'static str, &str); 5] {
        [
            ("utm_campaign", self.campaign.as_str()),
            ("utm_medium", self.medium.as_str()),
            ("utm_source", self.source.as_str()),
            ("utm_term", self.term.as_str()),
            ("utm_content", self.content.as_str()),
        ]
    }
}

/// First-touch parameters plus an optional later touch appended to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtmAttribution {
    pub original: UtmParams,
    pub extra: Option<UtmParams>,
}

fn choose<'a, R: Rng + ?Sized>(items: &[&'a str], rng: &mut R) -> &'a str {
    items[rng.random_range(0..items.len())]
}
