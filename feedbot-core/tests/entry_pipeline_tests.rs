use std::collections::HashMap;
use std::time::Duration;

use feedbot_core::config::{
    FeedConfig, FilterLists, FormatConfig, FormatTemplates, SubConfig, SubRule, Tunables,
};
use feedbot_core::{Feed, FeedEntry, FeedKey, FilterCache};

fn build_feed(config: FeedConfig, tunables: &Tunables, entries: Vec<FeedEntry>) -> Feed {
    let filters = FilterCache::new(8);
    Feed::build(
        FeedKey::new("#news", "upstream"),
        config,
        tunables,
        &filters,
        entries,
        1,
        Duration::ZERO,
    )
    .expect("pipeline")
}

fn titles(feed: &Feed) -> Vec<&str> {
    feed.entries.iter().map(|e| e.title.as_str()).collect()
}

fn urls(feed: &Feed) -> Vec<&str> {
    feed.entries.iter().map(|e| e.long_url.as_str()).collect()
}

#[test]
fn blacklist_then_whitelist() {
    // Blacklisted "spam sale" goes, whitelist keeps only "news alpha".
    let config = FeedConfig {
        blacklist: Some(FilterLists {
            title: vec!["^spam".into()],
            ..FilterLists::default()
        }),
        whitelist: Some(FilterLists {
            title: vec!["alpha".into()],
            ..FilterLists::default()
        }),
        ..FeedConfig::default()
    };
    let entries = vec![
        FeedEntry::new("spam sale", "https://example.com/u1"),
        FeedEntry::new("news alpha", "https://example.com/u2"),
        FeedEntry::new("news", "https://example.com/u3"),
    ];
    let feed = build_feed(config, &Tunables::default(), entries);
    assert_eq!(urls(&feed), vec!["https://example.com/u2"]);
    assert_eq!(
        feed.entries[0].matching_title_pattern.as_deref(),
        Some("alpha")
    );
}

#[test]
fn blacklist_matches_categories_and_urls() {
    let config = FeedConfig {
        blacklist: Some(FilterLists {
            url: vec!["/ads/".into()],
            category: vec!["^sponsored$".into()],
            ..FilterLists::default()
        }),
        ..FeedConfig::default()
    };
    let mut tagged = FeedEntry::new("kept title", "https://example.com/a");
    tagged.categories = vec!["sponsored".into()];
    let entries = vec![
        tagged,
        FeedEntry::new("ad", "https://example.com/ads/1"),
        FeedEntry::new("fine", "https://example.com/b"),
    ];
    let feed = build_feed(config, &Tunables::default(), entries);
    assert_eq!(urls(&feed), vec!["https://example.com/b"]);
}

#[test]
fn empty_whitelist_keeps_everything() {
    let config = FeedConfig {
        whitelist: Some(FilterLists::default()),
        ..FeedConfig::default()
    };
    let entries = vec![
        FeedEntry::new("one", "https://example.com/1"),
        FeedEntry::new("two", "https://example.com/2"),
    ];
    let feed = build_feed(config, &Tunables::default(), entries);
    assert_eq!(feed.entries.len(), 2);
}

#[test]
fn https_upgrade_and_substitution() {
    let config = FeedConfig {
        https: Some(true),
        sub: Some(SubConfig {
            title: Some(SubRule {
                pattern: r"\s*\(preprint\)$".into(),
                repl: "".into(),
            }),
            url: Some(SubRule {
                pattern: r"\?utm_source=.*$".into(),
                repl: "".into(),
            }),
        }),
        ..FeedConfig::default()
    };
    let entries = vec![FeedEntry::new(
        "Result (preprint)",
        "http://example.com/paper?utm_source=rss",
    )];
    let feed = build_feed(config, &Tunables::default(), entries);
    assert_eq!(titles(&feed), vec!["Result"]);
    assert_eq!(urls(&feed), vec!["https://example.com/paper"]);
}

#[test]
fn format_re_named_groups_feed_templates() {
    let mut entry = FeedEntry::new("ignored", "https://example.com/item/4217");
    entry
        .raw_fields
        .insert("author".to_string(), "Knuth".to_string());
    let config = FeedConfig {
        format: Some(FormatConfig {
            re: HashMap::from([("url".to_string(), r"/item/(?P<id>\d+)$".to_string())]),
            templates: FormatTemplates {
                title: Some("#{id} by {author}".into()),
                url: None,
            },
        }),
        ..FeedConfig::default()
    };
    let feed = build_feed(config, &Tunables::default(), vec![entry]);
    assert_eq!(titles(&feed), vec!["#4217 by Knuth"]);
    assert_eq!(urls(&feed), vec!["https://example.com/item/4217"]);
}

#[test]
fn bad_template_leaves_field_unchanged() {
    let config = FeedConfig {
        format: Some(FormatConfig {
            re: HashMap::new(),
            templates: FormatTemplates {
                title: Some("{missing_field}".into()),
                url: None,
            },
        }),
        ..FeedConfig::default()
    };
    let entries = vec![FeedEntry::new("original", "https://example.com/1")];
    let feed = build_feed(config, &Tunables::default(), entries);
    assert_eq!(titles(&feed), vec!["original"]);
}

#[test]
fn format_re_field_missing_from_entry_fails_the_batch() {
    // "author" is neither a raw field of this entry nor a canonical key, so
    // the whole batch errors instead of posting a half-formatted entry.
    let config = FeedConfig {
        format: Some(FormatConfig {
            re: HashMap::from([("author".to_string(), r"(?P<surname>\w+)$".to_string())]),
            templates: FormatTemplates {
                title: Some("{title} by {surname}".into()),
                url: None,
            },
        }),
        ..FeedConfig::default()
    };
    let filters = FilterCache::new(8);
    let result = Feed::build(
        FeedKey::new("#news", "upstream"),
        config,
        &Tunables::default(),
        &filters,
        vec![FeedEntry::new("t", "https://example.com/1")],
        1,
        Duration::ZERO,
    );
    assert!(matches!(
        result,
        Err(feedbot_core::BotError::MissingFormatField { .. })
    ));
}

#[test]
fn url_spaces_are_escaped() {
    let entries = vec![FeedEntry::new(
        "t",
        "  https://example.com/api?region=New York&date=2020-03-15 ",
    )];
    let feed = build_feed(FeedConfig::default(), &Tunables::default(), entries);
    assert_eq!(
        urls(&feed),
        vec!["https://example.com/api?region=New%20York&date=2020-03-15"]
    );
}

#[test]
fn html_is_stripped_from_title_and_summary() {
    let mut entry = FeedEntry::new("<b>Bold</b> move", "https://example.com/1");
    entry.summary = "<p>Some <i>summary</i></p>".into();
    let feed = build_feed(FeedConfig::default(), &Tunables::default(), vec![entry]);
    assert_eq!(titles(&feed), vec!["Bold move"]);
    assert_eq!(feed.entries[0].summary, "Some summary");
}

#[test]
fn smart_quotes_are_stripped_only_around_whole_title() {
    let entries = vec![
        FeedEntry::new("\u{201C}Quoted title\u{201D}", "https://example.com/1"),
        FeedEntry::new(
            "\u{201C}One\u{201D} and \u{201C}two\u{201D}",
            "https://example.com/2",
        ),
    ];
    let feed = build_feed(FeedConfig::default(), &Tunables::default(), entries);
    assert_eq!(
        titles(&feed),
        vec!["Quoted title", "\u{201C}One\u{201D} and \u{201C}two\u{201D}"]
    );
}

#[test]
fn trailing_period_rules() {
    let entries = vec![
        FeedEntry::new("Single sentence.", "https://example.com/1"),
        FeedEntry::new("First. Second.", "https://example.com/2"),
    ];
    let feed = build_feed(FeedConfig::default(), &Tunables::default(), entries);
    // Multi-sentence titles keep their period; the crude ". " test decides.
    assert_eq!(titles(&feed), vec!["Single sentence", "First. Second."]);
}

#[test]
fn all_caps_titles_are_recapitalized() {
    let entries = vec![
        FeedEntry::new("BREAKING NEWS TODAY", "https://example.com/1"),
        FeedEntry::new("NASA", "https://example.com/2"),
    ];
    let feed = build_feed(FeedConfig::default(), &Tunables::default(), entries);
    // Single words are acronyms more often than shouting.
    assert_eq!(titles(&feed), vec!["Breaking news today", "NASA"]);
}

#[test]
fn titles_are_truncated_to_byte_budget() {
    let tunables = Tunables {
        title_max_bytes: 24,
        ..Tunables::default()
    };
    let entries = vec![FeedEntry::new(
        "a very long title that cannot possibly fit the budget",
        "https://example.com/1",
    )];
    let feed = build_feed(FeedConfig::default(), &tunables, entries);
    assert!(feed.entries[0].title.len() <= 24);
    assert!(feed.entries[0].title.ends_with('…'));
}

#[test]
fn duplicate_urls_collapse_to_first_seen() {
    let entries = vec![
        FeedEntry::new("first", "https://example.com/same"),
        FeedEntry::new("other", "https://example.com/other"),
        FeedEntry::new("second", "https://example.com/same"),
    ];
    let feed = build_feed(FeedConfig::default(), &Tunables::default(), entries);
    assert_eq!(
        urls(&feed),
        vec!["https://example.com/same", "https://example.com/other"]
    );
    assert_eq!(feed.entries[0].title, "first");
}
