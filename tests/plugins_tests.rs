// ABOUTME: Integration tests for the built-in plugins through the real dispatcher
// ABOUTME: Covers help, admin commands, seen, post office, keywords, feeds and transform

mod common;

use chrono::Utc;
use common::Harness;
use noko::plugins::feeds::{FeedPost, FEED_LOG};
use noko_core::{Outcome, Plugin, TickContext};
use std::sync::atomic::Ordering;

const ADMINS: &str = "[bot]\nadmins = [\"alice\"]\n";

#[tokio::test]
async fn test_help_lists_what_the_user_can_run() {
    let mut h = Harness::new(ADMINS);

    assert_eq!(
        h.say("lobby", "bob", ".help").await,
        vec!["Available commands: chat, help, ping, remindme, seen, tell."]
    );
    assert_eq!(
        h.say("lobby", "alice", ".help").await,
        vec!["Available commands: chat, help, ping, remindme, seen, tell. Categories: admin. Use '.help <category>' to list one."]
    );
    assert_eq!(
        h.say("lobby", "alice", ".help admin").await,
        vec!["Commands in category 'admin': cleartells, ignore, join, leave, logs, reload, shutdown."]
    );
}

#[tokio::test]
async fn test_help_for_one_command() {
    let mut h = Harness::new(ADMINS);

    assert_eq!(
        h.say("lobby", "bob", ".help tell").await,
        vec![".tell: Pass a message to someone the next time they speak here Usage: .tell <nick> <message>"]
    );
    // admin-only commands stay hidden from everyone else
    assert_eq!(
        h.say("lobby", "bob", ".help join").await,
        vec!["No command or category named 'join' found."]
    );
}

#[tokio::test]
async fn test_help_respects_disabled_commands() {
    let mut h = Harness::new("[rooms.lobby]\ndisabled_commands = [\"tell\", \"remindme\"]\n");

    assert_eq!(
        h.say("lobby", "bob", ".help").await,
        vec!["Available commands: chat, help, ping, seen."]
    );
    assert_eq!(
        h.say("annex", "bob", ".help").await,
        vec!["Available commands: chat, help, ping, remindme, seen, tell."]
    );
}

#[tokio::test]
async fn test_admin_commands_drive_the_runtime() {
    let mut h = Harness::new(ADMINS);

    assert_eq!(h.say("lobby", "alice", ".join annex").await, vec!["Joining annex"]);
    assert_eq!(h.control.joined.lock().unwrap().clone(), vec!["annex"]);

    assert_eq!(
        h.say("lobby", "alice", ".reload").await,
        vec!["Configuration reloaded (generation 7)."]
    );
    assert_eq!(
        h.say("lobby", "alice", ".restart").await,
        vec!["Configuration reloaded (generation 7)."]
    );

    // leaving the current room says nothing there
    assert!(h.say("lobby", "alice", ".leave").await.is_empty());
    assert_eq!(h.control.left.lock().unwrap().clone(), vec!["lobby"]);

    let forbidden = h.send("lobby", "bob", ".join annex").await;
    assert_eq!(forbidden.outcome, Outcome::Forbidden);
}

#[tokio::test]
async fn test_ignore_command_silences_actor() {
    let mut h = Harness::new(ADMINS);

    assert_eq!(
        h.say("lobby", "alice", ".ignore add mallory").await,
        vec!["Ignoring mallory."]
    );
    assert_eq!(h.send("lobby", "mallory", ".ping").await.outcome, Outcome::Ignored);
    assert_eq!(
        h.say("lobby", "alice", ".ignore list").await,
        vec!["Ignored users: mallory"]
    );
    assert_eq!(
        h.say("lobby", "alice", ".ignore remove mallory").await,
        vec!["No longer ignoring mallory."]
    );
    assert_eq!(h.say("lobby", "mallory", ".ping").await, vec!["pong"]);
}

#[tokio::test]
async fn test_seen_reports_last_message_in_room() {
    let mut h = Harness::new("");

    h.send("lobby", "bob", "off to lunch").await;
    let reply = h.say("lobby", "carol", ".seen Bob").await;
    assert_eq!(reply.len(), 1);
    assert!(reply[0].starts_with("User 'bob' was last seen "), "{}", reply[0]);
    assert!(reply[0].ends_with(" ago saying 'off to lunch'."), "{}", reply[0]);

    // sightings are per room
    assert_eq!(
        h.say("annex", "carol", ".seen bob").await,
        vec!["No messages from bob found."]
    );
}

#[tokio::test]
async fn test_tell_is_delivered_on_next_message() {
    let mut h = Harness::new("");

    assert_eq!(
        h.say("lobby", "bob", ".tell carol bring cake").await,
        vec!["Sure, I will tell carol bring cake for you when I see them."]
    );
    // someone else speaking doesn't trigger delivery
    h.send("lobby", "dave", "hello").await;

    assert_eq!(
        h.say("lobby", "carol", "hi all").await,
        vec!["carol, bob wanted me to tell you bring cake"]
    );
    assert!(h.say("lobby", "carol", "still here").await.is_empty());
}

#[tokio::test]
async fn test_tell_to_self_suggests_remindme() {
    let mut h = Harness::new("");
    assert_eq!(
        h.say("lobby", "bob", ".tell Bob buy milk").await,
        vec!["Use '.remindme' instead."]
    );
}

#[tokio::test]
async fn test_reminder_fires_on_tick() {
    let mut h = Harness::new("");

    assert_eq!(
        h.say("lobby", "bob", ".remindme in 1 min stretch").await,
        vec!["Sure, I will remind you of 'stretch' in 1 minute."]
    );

    let registry = std::sync::Arc::clone(&h.dispatcher.services().registry);
    let post_office = registry.get("post_office").unwrap();
    let joined = vec!["lobby".to_string()];
    let ctx = TickContext {
        config: &h.snapshot.config,
        llm: &h.snapshot.llm,
        store: h.store.as_ref(),
        joined_rooms: &joined,
    };

    let early = post_office.tick(&ctx, Utc::now()).await.unwrap();
    assert!(early.is_empty());

    let later = Utc::now() + chrono::Duration::minutes(2);
    let due = post_office.tick(&ctx, later).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].room_id, "lobby");
    assert_eq!(due[0].text, "Reminder for bob: stretch");

    assert!(post_office.tick(&ctx, later).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reminder_waits_for_room_to_be_joined() {
    let mut h = Harness::new("");
    h.send("lobby", "bob", ".remindme in 1 min stretch").await;

    let registry = std::sync::Arc::clone(&h.dispatcher.services().registry);
    let post_office = registry.get("post_office").unwrap();
    let later = Utc::now() + chrono::Duration::minutes(2);

    let elsewhere = vec!["annex".to_string()];
    let ctx = TickContext {
        config: &h.snapshot.config,
        llm: &h.snapshot.llm,
        store: h.store.as_ref(),
        joined_rooms: &elsewhere,
    };
    assert!(post_office.tick(&ctx, later).await.unwrap().is_empty());

    let joined = vec!["lobby".to_string()];
    let ctx = TickContext {
        joined_rooms: &joined,
        ..ctx
    };
    assert_eq!(post_office.tick(&ctx, later).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_cleartells_needs_confirmation() {
    let mut h = Harness::new(ADMINS);
    h.send("lobby", "bob", ".tell carol hi").await;

    assert_eq!(
        h.say("lobby", "alice", ".cleartells").await,
        vec!["This will delete all tells from lobby. To confirm, type '.cleartells yes'."]
    );
    assert_eq!(
        h.say("lobby", "alice", ".cleartells yes").await,
        vec!["All tells from lobby have been deleted."]
    );
    assert!(h.say("lobby", "carol", "morning").await.is_empty());
}

#[tokio::test]
async fn test_keyword_rules_answer_plain_messages() {
    let mut h = Harness::new(
        r#"
[[plugins.keywords.rules]]
triggers = ["coffee"]
responses = ["Coffee is brewing."]
"#,
    );

    let dispatch = h.send("lobby", "bob", "Anyone want COFFEEE?").await;
    assert_eq!(dispatch.outcome, Outcome::Handled);
    assert_eq!(dispatch.replies.len(), 1);
    assert_eq!(dispatch.replies[0].text, "Coffee is brewing.");
    assert_eq!(dispatch.replies[0].mention_actor, None);

    assert_eq!(h.send("lobby", "bob", "tea please").await.outcome, Outcome::NoAction);
}

#[tokio::test]
async fn test_keywords_disabled_in_room() {
    let mut h = Harness::new(
        r#"
[rooms.quiet]
disabled_plugins = ["keywords"]

[[plugins.keywords.rules]]
triggers = ["coffee"]
responses = ["Coffee is brewing."]
"#,
    );

    assert!(h.say("quiet", "bob", "coffee").await.is_empty());
    assert_eq!(h.say("lobby", "bob", "coffee").await, vec!["Coffee is brewing."]);
}

#[tokio::test]
async fn test_feeds_tick_posts_queued_entries() {
    let h = Harness::new("[plugins.feeds]\nrooms = [\"lobby\", \"gone\"]\n");

    let general = FeedPost {
        title: "Release notes".into(),
        link: "https://example.org/notes".into(),
        description: None,
        rooms: None,
    };
    let targeted = FeedPost {
        title: "Annex news".into(),
        link: "https://example.org/annex".into(),
        description: Some("Long article".into()),
        rooms: Some(vec!["annex".into()]),
    };
    h.store
        .append_log(FEED_LOG, &serde_json::to_string(&general).unwrap())
        .unwrap();
    h.store.append_log(FEED_LOG, "not json").unwrap();
    h.store
        .append_log(FEED_LOG, &serde_json::to_string(&targeted).unwrap())
        .unwrap();

    let registry = std::sync::Arc::clone(&h.dispatcher.services().registry);
    let feeds = registry.get("feeds").unwrap();
    let joined = vec!["annex".to_string(), "lobby".to_string()];
    let ctx = TickContext {
        config: &h.snapshot.config,
        llm: &h.snapshot.llm,
        store: h.store.as_ref(),
        joined_rooms: &joined,
    };

    let out = feeds.tick(&ctx, Utc::now()).await.unwrap();
    let posted: Vec<(&str, &str)> = out
        .iter()
        .map(|e| (e.room_id.as_str(), e.text.as_str()))
        .collect();
    assert_eq!(
        posted,
        vec![
            ("lobby", "https://example.org/notes\n🌐 *Release notes*"),
            ("annex", "https://example.org/annex\n🌐 *Annex news*"),
        ]
    );

    // the log was drained
    assert!(feeds.tick(&ctx, Utc::now()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_chat_command_explains_itself() {
    let mut h = Harness::new("[llm]\nenabled = false\n");
    assert_eq!(
        h.say("lobby", "bob", ".chat").await,
        vec!["Conversation is switched off here."]
    );
}

#[tokio::test]
async fn test_shutdown_command_asks_the_process_to_stop() {
    let mut h = Harness::new(ADMINS);

    assert_eq!(h.send("lobby", "bob", ".shutdown").await.outcome, Outcome::Forbidden);
    assert_eq!(h.control.shutdowns.load(Ordering::SeqCst), 0);

    assert_eq!(h.say("lobby", "alice", ".shutdown").await, vec!["Going to sleep..."]);
    assert_eq!(h.control.shutdowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_logs_only_answer_in_direct_messages() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("noko.log");
    std::fs::write(&path, "first\nsecond\nthird\n").unwrap();
    let mut h = Harness::new(&format!(
        "{ADMINS}[logging]\nlog_to_file = true\nlog_file_path = {:?}\n",
        path.display().to_string()
    ));

    assert!(h.say("lobby", "alice", ".logs").await.is_empty());
    assert_eq!(h.direct("alice", ".logs 2").await, vec!["second\nthird"]);
    assert_eq!(h.direct("alice", ".logs 2 1").await, vec!["second"]);
    assert_eq!(
        h.direct("alice", ".logs soon").await,
        vec!["Usage: .logs [num] | logs <start> <num>"]
    );
}

#[tokio::test]
async fn test_logs_without_file_logging() {
    let mut h = Harness::new(ADMINS);
    assert_eq!(
        h.direct("alice", ".logs").await,
        vec!["Logging to file is disabled."]
    );
}

const PIRATE: &str = r#"
[llm.prompts]
pirate_filter = "Say it like a pirate: {text}"

[[llm.backends]]
type = "mock"
default = "Arr, ahoy there!"
"#;

#[tokio::test]
async fn test_transform_restyles_text() {
    let mut h = Harness::new(PIRATE);

    assert_eq!(h.say("lobby", "bob", ".pirate hello there").await, vec!["Arr, ahoy there!"]);
    assert_eq!(
        h.say("lobby", "carol", ".pirate").await,
        vec!["Usage: .pirate <text>"]
    );
    assert_eq!(
        h.say("lobby", "bob", ".help transform").await,
        vec!["Commands in category 'transform': pirate."]
    );
}

#[tokio::test]
async fn test_transform_shares_one_cooldown() {
    let mut h = Harness::new(&PIRATE.replace(
        "pirate_filter",
        "poet_filter = \"Rhyme: {text}\"\npirate_filter",
    ));

    assert_eq!(h.say("lobby", "bob", ".pirate hi").await, vec!["Arr, ahoy there!"]);
    assert_eq!(h.send("lobby", "bob", ".poet hi").await.outcome, Outcome::Throttled);
}
