//! Targeted text substitutions applied to each source line.
//!
//! Lines are never parsed here. Every change is a pattern replacement against a
//! known field marker, so fields this module does not know about pass through
//! byte for byte.

use crate::session::SessionIdentity;
use crate::utm::UtmAttribution;
use crate::window::iso8601;
use eventseed_config::{SiteConfig, SourceConfig};
use regex::{Captures, NoExpand, Regex};
use std::sync::OnceLock;

/// Tenant id the recorded dataset was captured with.
pub const PLACEHOLDER_TENANT_ID: &str = "1";

/// Embedded in events from the personalization demo block.
pub const PERSONALIZATION_CLIENT_MARKER: &str =
    r#""clientId":"2a7d3480-e525-4fc0-b27d-66d677dd3008""#;
/// Embedded in events from the A/B test demo block.
pub const AB_TEST_CLIENT_MARKER: &str = r#""clientId":"f7s8fgs9-e525-4fc0-b27d-66d677dd3008""#;

const FIRST_AUDIENCE_COUNTRY: &str = r#""Country":"FR""#;
const SECOND_AUDIENCE_COUNTRY: &str = r#""Country":"JP""#;

fn session_re() -> &'static Regex {
    static SESSION_RE: OnceLock<Regex> = OnceLock::new();
    SESSION_RE.get_or_init(|| Regex::new(r#""session":"([a-z0-9-]+)""#).expect("valid session regex"))
}

fn visitor_id_re() -> &'static Regex {
    static VISITOR_ID_RE: OnceLock<Regex> = OnceLock::new();
    VISITOR_ID_RE.get_or_init(|| Regex::new(r#""Id":"([a-z0-9-]+)""#).expect("valid visitor id regex"))
}

fn event_timestamp_re() -> &'static Regex {
    static EVENT_TIMESTAMP_RE: OnceLock<Regex> = OnceLock::new();
    EVENT_TIMESTAMP_RE
        .get_or_init(|| Regex::new(r#""event_timestamp":\d+"#).expect("valid timestamp regex"))
}

fn date_re() -> &'static Regex {
    static DATE_RE: OnceLock<Regex> = OnceLock::new();
    DATE_RE.get_or_init(|| Regex::new(r#""date":"[^"]*""#).expect("valid date regex"))
}

fn attributes_open_re() -> &'static Regex {
    static ATTRIBUTES_OPEN_RE: OnceLock<Regex> = OnceLock::new();
    ATTRIBUTES_OPEN_RE
        .get_or_init(|| Regex::new(r#""attributes":\{(\s*\})?"#).expect("valid attributes regex"))
}

fn endpoint_attributes_open_re() -> &'static Regex {
    static ENDPOINT_ATTRIBUTES_OPEN_RE: OnceLock<Regex> = OnceLock::new();
    ENDPOINT_ATTRIBUTES_OPEN_RE.get_or_init(|| {
        Regex::new(r#""Attributes":\{(\s*\})?"#).expect("valid endpoint attributes regex")
    })
}

fn audience_re() -> &'static Regex {
    static AUDIENCE_RE: OnceLock<Regex> = OnceLock::new();
    AUDIENCE_RE.get_or_init(|| Regex::new(r#""audience":"(\d+)""#).expect("valid audience regex"))
}

fn post_id_re() -> &'static Regex {
    static POST_ID_RE: OnceLock<Regex> = OnceLock::new();
    POST_ID_RE.get_or_init(|| Regex::new(r#""postId":"(\d+)""#).expect("valid post id regex"))
}

fn url_re() -> &'static Regex {
    static URL_RE: OnceLock<Regex> = OnceLock::new();
    URL_RE.get_or_init(|| Regex::new(r#""url":"([^"]+)""#).expect("valid url regex"))
}

/// Id and permalink of a demo page on the target install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoTarget {
    pub id: String,
    pub url: String,
}

/// Install-specific values substituted into every line.
#[derive(Debug, Clone, Default)]
pub struct RewriteContext {
    pub placeholder_origin: String,
    pub base_url: String,
    pub blog_id: String,
    pub network_id: String,
    /// Audience ids for the first (FR) and second (JP) demo audience.
    pub audience_ids: [Option<String>; 2],
    pub personalization_page: Option<DemoTarget>,
    pub ab_test_page: Option<DemoTarget>,
}

impl RewriteContext {
    pub fn from_config(source: &SourceConfig, site: &SiteConfig) -> Self {
        Self {
            placeholder_origin: source.placeholder_origin.trim_end_matches('/').to_string(),
            base_url: site.base_url.trim_end_matches('/').to_string(),
            blog_id: site.blog_id.clone(),
            network_id: site.network_id.clone(),
            audience_ids: [None, None],
            personalization_page: None,
            ab_test_page: None,
        }
    }
}

/// The raw session key of a line, or `None` for blank and malformed lines.
pub fn extract_session_key(line: &str) -> Option<&str> {
    session_re()
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Applies `identity` and `ctx` to one line. Pure: the same inputs always give the
/// same output.
pub fn rewrite_line(line: &str, identity: &SessionIdentity, ctx: &RewriteContext) -> String {
    let mut out = line.to_string();

    if let Some(visitor_id) = identity.visitor_id {
        out = replace_all(visitor_id_re(), &out, &format!(r#""Id":"{visitor_id}""#));
    }

    out = replace_all(
        session_re(),
        &out,
        &format!(r#""session":"{}""#, identity.session_id),
    );
    out = replace_all(
        event_timestamp_re(),
        &out,
        &format!(r#""event_timestamp":{}"#, identity.timestamp_ms),
    );
    out = set_date_attribute(&out, &iso8601(identity.timestamp_ms));

    if !ctx.placeholder_origin.is_empty() {
        out = out.replace(&ctx.placeholder_origin, &ctx.base_url);
    }

    out = out.replace(
        &format!(r#""blogId":"{PLACEHOLDER_TENANT_ID}""#),
        &format!(r#""blogId":"{}""#, ctx.blog_id),
    );
    out = out.replace(
        &format!(r#""networkId":"{PLACEHOLDER_TENANT_ID}""#),
        &format!(r#""networkId":"{}""#, ctx.network_id),
    );

    if is_experience_event(&out) {
        out = rewrite_experience_ids(out, ctx);
    }

    if let Some(utm) = &identity.utm {
        out = inject_utm(&out, utm);
    }

    out
}

fn replace_all(re: &Regex, haystack: &str, replacement: &str) -> String {
    re.replace_all(haystack, NoExpand(replacement)).into_owned()
}

fn set_date_attribute(line: &str, date: &str) -> String {
    if line.contains(r#""date":"#) {
        return replace_all(date_re(), line, &format!(r#""date":"{date}""#));
    }

    prepend_to_object(attributes_open_re(), "attributes", line, &format!(r#""date":"{date}""#))
}

/// Inserts `fields` as the first members of every `"<name>":{` object matched by `re`.
fn prepend_to_object(re: &Regex, name: &str, line: &str, fields: &str) -> String {
    re.replace_all(line, |caps: &Captures| {
        if caps.get(1).is_some() {
            format!(r#""{name}":{{{fields}}}"#)
        } else {
            format!(r#""{name}":{{{fields},"#)
        }
    })
    .into_owned()
}

fn is_experience_event(line: &str) -> bool {
    line.contains(r#""event_type":"experience"#) || line.contains(r#""event_type":"conversion"#)
}

fn rewrite_experience_ids(mut line: String, ctx: &RewriteContext) -> String {
    let [first_audience, second_audience] = &ctx.audience_ids;

    if line.contains(FIRST_AUDIENCE_COUNTRY) {
        if let Some(id) = first_audience {
            line = replace_all(audience_re(), &line, &format!(r#""audience":"{id}""#));
        }
    }
    if line.contains(SECOND_AUDIENCE_COUNTRY) {
        if let Some(id) = second_audience {
            line = replace_all(audience_re(), &line, &format!(r#""audience":"{id}""#));
        }
    }

    for (marker, page) in [
        (PERSONALIZATION_CLIENT_MARKER, &ctx.personalization_page),
        (AB_TEST_CLIENT_MARKER, &ctx.ab_test_page),
    ] {
        if !line.contains(marker) {
            continue;
        }
        if let Some(page) = page {
            line = replace_all(post_id_re(), &line, &format!(r#""postId":"{}""#, page.id));
            if !page.url.is_empty() {
                line = replace_all(url_re(), &line, &format!(r#""url":"{}""#, page.url));
            }
        }
    }

    line
}

fn inject_utm(line: &str, utm: &UtmAttribution) -> String {
    let mut fields = Vec::with_capacity(10);

    for (name, value) in utm.original.pairs() {
        fields.push(format!(r#""initial_{name}":[{}]"#, json_string(value)));
    }

    let extra = utm.extra.as_ref().map(|extra| extra.pairs());
    for (idx, (name, value)) in utm.original.pairs().into_iter().enumerate() {
        let mut values = json_string(value);
        if let Some(extra) = &extra {
            values.push(',');
            values.push_str(&json_string(extra[idx].1));
        }
        fields.push(format!(r#""{name}":[{values}]"#));
    }

    prepend_to_object(
        endpoint_attributes_open_re(),
        "Attributes",
        line,
        &fields.join(","),
    )
}

fn json_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}
