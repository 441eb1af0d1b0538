//! Message rendering shared by every channel.

use chrono::{Datelike, NaiveDate};
use serde_json::{Value, json};

use super::{SlotDigest, SlotSummary};
use crate::db::models::parse_date_prefix;

pub const MAX_SLOTS_PER_MESSAGE: usize = 50;

const WEEKDAYS: [&str; 7] = ["日", "月", "火", "水", "木", "金", "土"];
const CLOSING: &str = "お早めにご予約ください。";

pub fn subject(digest: &SlotDigest) -> String {
    format!("【AkiGura】空き枠が見つかりました（{}件）", digest.slots.len())
}

/// Slots rendered into a message; the rest are summarised as a count.
pub fn visible_slots(digest: &SlotDigest) -> &[SlotSummary] {
    let end = digest.slots.len().min(MAX_SLOTS_PER_MESSAGE);
    &digest.slots[..end]
}

fn hidden_count(digest: &SlotDigest) -> usize {
    digest.slots.len() - visible_slots(digest).len()
}

/// `2026-01-24` becomes `2026-01-24(土)`; anything unparseable is left alone.
pub fn date_label(raw: &str) -> String {
    match parse_date_prefix(raw) {
        Some(date) => format!("{}({})", date.format("%Y-%m-%d"), weekday_label(date)),
        None => raw.to_string(),
    }
}

fn weekday_label(date: NaiveDate) -> &'static str {
    WEEKDAYS[date.weekday().num_days_from_sunday() as usize]
}

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

pub fn text_body(digest: &SlotDigest) -> String {
    let mut lines = vec![
        format!("{}様", digest.team_name),
        String::new(),
        format!("空き枠が{}件見つかりました。", digest.slots.len()),
    ];
    for (index, slot) in visible_slots(digest).iter().enumerate() {
        lines.push(String::new());
        lines.push(format!("【{}】{}", index + 1, slot.ground_name));
        lines.push(format!("日時: {} {}", date_label(&slot.slot_date), slot.time_range()));
        lines.push(format!("場所: {}", slot.court_name));
        if let Some(url) = &slot.reservation_url {
            lines.push(format!("予約: {url}"));
        }
    }
    let hidden = hidden_count(digest);
    if hidden > 0 {
        lines.push(String::new());
        lines.push(format!("ほか{hidden}件"));
    }
    lines.push(String::new());
    lines.push(CLOSING.to_string());
    lines.join("\n")
}

pub fn line_message(digest: &SlotDigest) -> String {
    format!("\n🏈 AkiGura 空き枠通知\n\n{}", text_body(digest))
}

pub fn html_body(digest: &SlotDigest) -> String {
    let mut html = String::from(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"UTF-8\"></head>\n\
         <body style=\"font-family: sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;\">\n\
         <div style=\"background: #4F46E5; color: white; padding: 20px; border-radius: 8px 8px 0 0;\">\
         <h1 style=\"margin: 0;\">🏈 AkiGura</h1></div>\n\
         <div style=\"border: 1px solid #e5e7eb; border-top: none; padding: 20px; border-radius: 0 0 8px 8px;\">\n",
    );
    html.push_str(&format!("<p>{} 様</p>\n", escape_html(&digest.team_name)));
    html.push_str(&format!(
        "<p>ご登録いただいた条件にマッチする空き枠が <strong>{}件</strong> 見つかりました。</p>\n",
        digest.slots.len()
    ));

    for slot in visible_slots(digest) {
        html.push_str(
            "<div style=\"background: #f3f4f6; padding: 15px; border-radius: 8px; margin: 15px 0;\">\n",
        );
        html.push_str(&format!(
            "<p style=\"margin: 5px 0;\"><strong>施設:</strong> {}</p>\n",
            escape_html(&slot.ground_name)
        ));
        html.push_str(&format!(
            "<p style=\"margin: 5px 0;\"><strong>日時:</strong> {} {}</p>\n",
            escape_html(&date_label(&slot.slot_date)),
            escape_html(&slot.time_range())
        ));
        html.push_str(&format!(
            "<p style=\"margin: 5px 0;\"><strong>場所:</strong> {}</p>\n",
            escape_html(&slot.court_name)
        ));
        if let Some(url) = &slot.reservation_url {
            html.push_str(&format!(
                "<p style=\"margin: 10px 0 5px 0;\"><a href=\"{}\" style=\"display: inline-block; \
                 background: #4F46E5; color: white; padding: 8px 16px; border-radius: 4px; \
                 text-decoration: none; font-size: 14px;\">予約サイトを開く →</a></p>\n",
                escape_html(url)
            ));
        }
        html.push_str("</div>\n");
    }

    let hidden = hidden_count(digest);
    if hidden > 0 {
        html.push_str(&format!("<p>ほか{hidden}件</p>\n"));
    }
    html.push_str(&format!("<p>{CLOSING}</p>\n"));
    html.push_str(
        "<hr style=\"border: none; border-top: 1px solid #e5e7eb; margin: 20px 0;\">\n\
         <p style=\"color: #6b7280; font-size: 12px;\">このメールは AkiGura から自動送信されています。</p>\n\
         </div>\n</body>\n</html>\n",
    );
    html
}

pub fn slack_blocks(digest: &SlotDigest) -> Value {
    let mut blocks = vec![
        json!({
            "type": "header",
            "text": {
                "type": "plain_text",
                "text": format!("🏈 AkiGura 空き枠通知（{}件）", digest.slots.len()),
                "emoji": true
            }
        }),
        json!({
            "type": "section",
            "text": {
                "type": "mrkdwn",
                "text": format!(
                    "*{}* 様\nご登録いただいた条件にマッチする空き枠が見つかりました。",
                    digest.team_name
                )
            }
        }),
        json!({ "type": "divider" }),
    ];

    for slot in visible_slots(digest) {
        let mut fields = vec![
            json!({ "type": "mrkdwn", "text": format!("*施設:*\n{}", slot.ground_name) }),
            json!({
                "type": "mrkdwn",
                "text": format!("*日時:*\n{} {}", date_label(&slot.slot_date), slot.time_range())
            }),
            json!({ "type": "mrkdwn", "text": format!("*場所:*\n{}", slot.court_name) }),
        ];
        if let Some(url) = &slot.reservation_url {
            fields.push(json!({ "type": "mrkdwn", "text": format!("*予約:*\n<{url}|予約サイト>") }));
        }
        blocks.push(json!({ "type": "section", "fields": fields }));
    }

    let hidden = hidden_count(digest);
    let footer = if hidden > 0 {
        format!("ほか{hidden}件。{CLOSING}")
    } else {
        CLOSING.to_string()
    };
    blocks.push(json!({
        "type": "context",
        "elements": [{ "type": "mrkdwn", "text": footer }]
    }));

    json!({ "blocks": blocks })
}
