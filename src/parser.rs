use crate::config::{ExtractFormat, FieldRule, LoadedSource, SourceConfig};
use crate::fetch::FetchedDocument;
use crate::model::{CandidateListing, DateSignal};
use crate::resolve::Resolver;
use anyhow::{Context, Result, anyhow};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use url::Url;

pub trait CustomParser: Send + Sync {
    fn key(&self) -> &'static str;
    fn parse(
        &self,
        source: &LoadedSource,
        docs: &[FetchedDocument],
        resolver: &Resolver<'_>,
    ) -> Result<Vec<CandidateListing>>;
}

pub fn parse_source_listings(
    source: &LoadedSource,
    docs: &[FetchedDocument],
    resolver: &Resolver<'_>,
) -> Result<Vec<CandidateListing>> {
    if let Some(parser_key) = source
        .config
        .custom
        .parser
        .as_ref()
        .filter(|_| source.config.custom.enabled)
    {
        if let Some(result) = run_custom_parser(parser_key, source, docs, resolver) {
            let listings = result?;
            info!(
                source = %source.config.source.key,
                parser = %parser_key,
                listings = listings.len(),
                "custom parser produced listings"
            );
            return Ok(listings);
        }
        warn!(
            source = %source.config.source.key,
            parser = %parser_key,
            "custom parser not found; falling back to declarative parser"
        );
    }

    parse_declarative(source, docs, resolver)
}

fn run_custom_parser(
    parser_key: &str,
    source: &LoadedSource,
    docs: &[FetchedDocument],
    resolver: &Resolver<'_>,
) -> Option<Result<Vec<CandidateListing>>> {
    let parser: Box<dyn CustomParser> = match parser_key {
        "slider_cards_v1" => Box::new(SliderCardsParser),
        _ => return None,
    };
    Some(parser.parse(source, docs, resolver))
}

fn parse_declarative(
    source: &LoadedSource,
    docs: &[FetchedDocument],
    resolver: &Resolver<'_>,
) -> Result<Vec<CandidateListing>> {
    let mut mapped_records = Vec::new();

    for doc in docs {
        let records = match source.config.extract.format {
            ExtractFormat::Html => parse_html_document(&source.config, doc)?,
            ExtractFormat::Json => parse_json_document(&source.config, doc)?,
        };
        mapped_records.extend(records);
    }

    let mut listings = Vec::new();
    for mapped in mapped_records {
        if let Some(listing) = mapped_record_to_listing(&source.config, mapped, resolver) {
            listings.push(listing);
        }
    }

    Ok(listings)
}

#[derive(Debug, Clone)]
struct MappedRecord {
    fields: BTreeMap<String, String>,
    base_url: Option<String>,
    raw_text: String,
}

#[derive(Clone, Copy)]
enum MappingCtx<'a> {
    Html { node: ElementRef<'a> },
    Json { value: &'a Value },
}

fn parse_html_document(source: &SourceConfig, doc: &FetchedDocument) -> Result<Vec<MappedRecord>> {
    let html_text = String::from_utf8_lossy(&doc.body).to_string();
    let parsed = Html::parse_document(&html_text);

    let base_url = Url::parse(&doc.source_url)
        .ok()
        .map(|u| {
            let mut x = u;
            x.set_query(None);
            x.set_fragment(None);
            x.to_string()
        })
        .or_else(|| source.fetch.base_url.clone());

    let selector_text = source.extract.root_selector.as_deref().unwrap_or("body");
    let selector = Selector::parse(selector_text)
        .map_err(|err| anyhow!("invalid root_selector {selector_text}: {err:?}"))?;
    let nodes: Vec<ElementRef<'_>> = parsed.select(&selector).collect();

    if nodes.is_empty() {
        warn!(source = %source.source.key, url = %doc.source_url, "no html nodes matched; skipping document");
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    for node in nodes {
        let raw_text = node.text().collect::<Vec<_>>().join(" ");
        let mut mapped = BTreeMap::new();

        for (field, rule) in &source.map {
            let value = evaluate_field_rule(
                field,
                rule,
                MappingCtx::Html { node },
                &mapped,
                &raw_text,
                base_url.as_deref(),
                &doc.source_url,
            )?;

            if let Some(value) = value {
                mapped.insert(field.clone(), value);
            } else if !rule.optional {
                debug!(
                    source = %source.source.key,
                    field,
                    "missing non-optional field in html record"
                );
            }
        }

        out.push(MappedRecord {
            fields: mapped,
            base_url: base_url.clone(),
            raw_text,
        });
    }

    Ok(out)
}

fn parse_json_document(source: &SourceConfig, doc: &FetchedDocument) -> Result<Vec<MappedRecord>> {
    let payload: Value = serde_json::from_slice(&doc.body)
        .with_context(|| format!("failed to parse json from {}", doc.source_url))?;
    let nodes = select_json_nodes(&payload, source.extract.root_jsonpath.as_deref());

    let mut out = Vec::new();
    for node in nodes {
        let raw_text = node.to_string();
        let mut mapped = BTreeMap::new();

        if source.map.is_empty() {
            if let Some(obj) = node.as_object() {
                for (k, v) in obj {
                    if let Some(text) = json_value_to_string(v) {
                        mapped.insert(k.clone(), text);
                    }
                }
            }
        } else {
            for (field, rule) in &source.map {
                let value = evaluate_field_rule(
                    field,
                    rule,
                    MappingCtx::Json { value: node },
                    &mapped,
                    &raw_text,
                    None,
                    &doc.source_url,
                )?;
                if let Some(value) = value {
                    mapped.insert(field.clone(), value);
                }
            }
        }

        out.push(MappedRecord {
            fields: mapped,
            base_url: None,
            raw_text,
        });
    }

    Ok(out)
}

fn evaluate_field_rule(
    field_name: &str,
    rule: &FieldRule,
    ctx: MappingCtx<'_>,
    existing: &BTreeMap<String, String>,
    raw_text: &str,
    base_url: Option<&str>,
    source_url: &str,
) -> Result<Option<String>> {
    let mut value = if let Some(const_value) = &rule.const_value {
        Some(const_value.clone())
    } else {
        let from = rule.from.as_deref().unwrap_or(field_name);
        evaluate_from_expression(from, ctx, existing, raw_text, source_url)?
    };

    if let Some(pattern) = &rule.regex
        && let Some(v) = value.take()
    {
        value = extract_with_regex(&v, pattern, rule.capture.unwrap_or(1))?;
    }

    if rule.trim {
        value = value.map(|v| v.trim().to_string());
    }

    if rule.absolutize {
        value = value.map(|v| absolutize_url(base_url, &v));
    }

    if value.as_ref().is_some_and(|v| v.is_empty()) {
        return Ok(None);
    }

    Ok(value)
}

fn evaluate_from_expression(
    expr: &str,
    ctx: MappingCtx<'_>,
    existing: &BTreeMap<String, String>,
    raw_text: &str,
    source_url: &str,
) -> Result<Option<String>> {
    if let Some(key) = expr.strip_prefix("field:") {
        return Ok(existing.get(key).cloned());
    }
    if expr == "source_url" {
        return Ok(Some(source_url.to_string()));
    }
    if let Some(pattern) = expr.strip_prefix("regex:") {
        return extract_with_regex(raw_text, pattern, 1);
    }

    match ctx {
        MappingCtx::Html { node } => {
            if let Some(css) = expr.strip_prefix("css:") {
                return Ok(extract_css_value(node, css));
            }
        }
        MappingCtx::Json { value } => {
            if let Some(path) = expr.strip_prefix("json:") {
                let selected = select_json_value(value, path);
                return Ok(selected.as_ref().and_then(json_value_to_string));
            }
        }
    }

    Ok(existing.get(expr).cloned())
}

fn extract_css_value(node: ElementRef<'_>, expression: &str) -> Option<String> {
    let (selector_text, attr) = split_selector_attr(expression);
    let selector = Selector::parse(selector_text).ok()?;

    node.select(&selector)
        .next()
        .map(|el| element_attr_or_text(el, attr))
}

fn split_selector_attr(expression: &str) -> (&str, Option<&str>) {
    if let Some((selector, attr)) = expression.rsplit_once('@')
        && !attr.is_empty()
        && !attr.contains(' ')
    {
        return (selector, Some(attr));
    }
    (expression, None)
}

fn element_attr_or_text(element: ElementRef<'_>, attr: Option<&str>) -> String {
    if let Some(attr) = attr {
        return element
            .value()
            .attr(attr)
            .map(ToString::to_string)
            .unwrap_or_default();
    }

    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn select_json_nodes<'a>(root: &'a Value, path: Option<&str>) -> Vec<&'a Value> {
    match path {
        None => match root {
            Value::Array(items) => items.iter().collect(),
            _ => vec![root],
        },
        Some(path) => {
            if path.trim().is_empty() || path == "$" {
                return vec![root];
            }

            if let Some(pointer_path) = path.strip_prefix('/') {
                let pointer = format!("/{pointer_path}");
                return root
                    .pointer(&pointer)
                    .map(|v| match v {
                        Value::Array(items) => items.iter().collect(),
                        _ => vec![v],
                    })
                    .unwrap_or_default();
            }

            let Some(tokens) = jsonpath_tokens(path) else {
                return Vec::new();
            };

            let mut current = vec![root];
            for token in tokens {
                let mut next = Vec::new();
                match token {
                    JsonToken::Key(key) => {
                        for value in current {
                            if let Some(found) = value.get(key) {
                                next.push(found);
                            }
                        }
                    }
                    JsonToken::All(key) => {
                        for value in current {
                            if let Some(Value::Array(items)) = value.get(key) {
                                next.extend(items.iter());
                            }
                        }
                    }
                    JsonToken::Index(key, idx) => {
                        for value in current {
                            if let Some(Value::Array(items)) = value.get(key)
                                && let Some(found) = items.get(idx)
                            {
                                next.push(found);
                            }
                        }
                    }
                }
                current = next;
                if current.is_empty() {
                    break;
                }
            }
            current
        }
    }
}

fn select_json_value(root: &Value, path: &str) -> Option<Value> {
    let nodes = select_json_nodes(root, Some(path));
    if nodes.is_empty() {
        None
    } else if nodes.len() == 1 {
        Some(nodes[0].clone())
    } else {
        Some(Value::Array(nodes.into_iter().cloned().collect()))
    }
}

#[derive(Debug)]
enum JsonToken<'a> {
    Key(&'a str),
    All(&'a str),
    Index(&'a str, usize),
}

fn jsonpath_tokens(path: &str) -> Option<Vec<JsonToken<'_>>> {
    let trimmed = path.trim();
    let stripped = trimmed.strip_prefix("$.")?;
    let mut tokens = Vec::new();
    for part in stripped.split('.') {
        if let Some(key) = part.strip_suffix("[*]") {
            tokens.push(JsonToken::All(key));
            continue;
        }
        if let Some((key, idx_part)) = part.split_once('[')
            && let Some(idx_str) = idx_part.strip_suffix(']')
            && let Ok(idx) = idx_str.parse::<usize>()
        {
            tokens.push(JsonToken::Index(key, idx));
            continue;
        }
        tokens.push(JsonToken::Key(part));
    }
    Some(tokens)
}

fn json_value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(v) => Some(v.to_string()),
        other => Some(other.to_string()),
    }
}

fn mapped_record_to_listing(
    source: &SourceConfig,
    mapped: MappedRecord,
    resolver: &Resolver<'_>,
) -> Option<CandidateListing> {
    let title = mapped
        .fields
        .get("title")
        .or_else(|| mapped.fields.get("name"))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let Some(title) = title else {
        debug!(
            source = %source.source.key,
            raw = %mapped.raw_text,
            "skipping record with no title"
        );
        return None;
    };

    let link = mapped
        .fields
        .get("link")
        .or_else(|| mapped.fields.get("url"))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let Some(link) = link else {
        debug!(
            source = %source.source.key,
            title = %title,
            "skipping record with no link"
        );
        return None;
    };

    let image_url = mapped
        .fields
        .get("image")
        .or_else(|| mapped.fields.get("image_url"))
        .and_then(|raw| normalize_image_url(raw, mapped.base_url.as_deref()));

    let organizer = mapped.fields.get("organizer").cloned().unwrap_or_default();
    let themes = mapped.fields.get("themes").cloned().unwrap_or_default();
    let location = mapped
        .fields
        .get("location")
        .cloned()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| source.source.location_hint.clone())
        .unwrap_or_default();

    let mut date = DateSignal::Absent;
    if let Some(raw) = mapped.fields.get("date")
        && let Some(day) = resolver
            .extract_date(raw)
            .or_else(|| resolver.normalize(&DateSignal::Text(raw.clone())))
    {
        date = DateSignal::Day(day);
    }
    if date.is_absent()
        && let Some(raw) = mapped.fields.get("countdown")
        && let Some(day) = resolver.countdown_to_date(raw)
    {
        date = DateSignal::Day(day);
    }
    if date.is_absent()
        && let Some(day) = resolver.extract_date(&mapped.raw_text)
    {
        date = DateSignal::Day(day);
    }
    if date.is_absent() && source.search.enabled {
        if let Some(day) = resolver.resolve_via_title(&title) {
            date = DateSignal::Day(day);
        } else {
            warn!(source = %source.source.key, title = %title, "no date found");
        }
    }

    Some(CandidateListing {
        source_key: source.source.key.clone(),
        platform: source.source.platform.clone(),
        title,
        organizer,
        location,
        link,
        image_url,
        themes,
        is_offline: source.source.offline,
        date,
    })
}

fn normalize_image_url(raw: &str, base_url: Option<&str>) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(rest) = raw.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Some(raw.to_string());
    }
    if let Some(base) = base_url
        && let Ok(base_url) = Url::parse(base)
        && let Ok(joined) = base_url.join(raw)
    {
        return Some(joined.to_string());
    }
    None
}

fn extract_with_regex(input: &str, pattern: &str, capture: usize) -> Result<Option<String>> {
    let regex = Regex::new(pattern).with_context(|| format!("invalid regex pattern {pattern}"))?;
    let Some(caps) = regex.captures(input) else {
        return Ok(None);
    };
    let Some(value) = caps.get(capture) else {
        return Ok(None);
    };
    Ok(Some(value.as_str().trim().to_string()))
}

fn absolutize_url(base_url: Option<&str>, value: &str) -> String {
    if value.starts_with("http://") || value.starts_with("https://") {
        return value.to_string();
    }

    if let Some(base) = base_url
        && let Ok(base_url) = Url::parse(base)
        && let Ok(joined) = base_url.join(value)
    {
        return joined.to_string();
    }

    value.to_string()
}

/// Slider-card feeds: one card per line, tab-separated as
/// `card text<TAB>link<TAB>image`. The card text itself carries the mode and
/// the registration-end date.
struct SliderCardsParser;

impl CustomParser for SliderCardsParser {
    fn key(&self) -> &'static str {
        "slider_cards_v1"
    }

    fn parse(
        &self,
        source: &LoadedSource,
        docs: &[FetchedDocument],
        resolver: &Resolver<'_>,
    ) -> Result<Vec<CandidateListing>> {
        let card = Regex::new(
            r"(?i)^(.+?)\s+FREE\s+\|\s+(VIRTUAL|HYBRID|IN_PERSON)\s+Registration\s+Ends\s+on\s+(\w{3}\s+\w{3}\s+\d{2}\s+\d{4})(?:\s+Registration\s+closed|\s+Register\s+Now)?$",
        )
        .expect("slider card regex must compile");

        let mut listings = Vec::new();

        for doc in docs {
            let payload = String::from_utf8_lossy(&doc.body);
            for line in payload.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }

                let mut segments = line.split('\t').map(str::trim);
                let card_text = segments.next().unwrap_or_default();
                let link = segments.next().unwrap_or_default();
                let image = segments.next().unwrap_or_default();

                if link.is_empty() {
                    continue;
                }

                // Closed cards drop off the slider eventually; skip them now.
                if card_text.to_lowercase().contains("registration closed") {
                    continue;
                }

                let Some(caps) = card.captures(card_text) else {
                    warn!(
                        source = %source.config.source.key,
                        snippet = %card_text.chars().take(75).collect::<String>(),
                        "failed to parse slider card"
                    );
                    continue;
                };

                let title = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
                let mode = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
                let raw_date = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
                if title.is_empty() {
                    continue;
                }

                let date = resolver
                    .normalize(&DateSignal::Text(raw_date.to_string()))
                    .map(DateSignal::Day)
                    .unwrap_or_default();

                listings.push(CandidateListing {
                    source_key: source.config.source.key.clone(),
                    platform: source.config.source.platform.clone(),
                    title: title.to_string(),
                    organizer: String::new(),
                    location: source
                        .config
                        .source
                        .location_hint
                        .clone()
                        .unwrap_or_default(),
                    link: absolutize_url(source.config.fetch.base_url.as_deref(), link),
                    image_url: normalize_image_url(image, source.config.fetch.base_url.as_deref()),
                    themes: String::new(),
                    is_offline: !mode.eq_ignore_ascii_case("VIRTUAL"),
                    date,
                });
            }
        }

        Ok(listings)
    }
}
