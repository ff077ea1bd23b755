//! Personal knowledge source.
//!
//! Reads a user's most recent notes, flashcards, and active goals from a
//! [`PersonalDataStore`] and maps them to [`PersonalItem`]s. Each category
//! has its own cap; the three reads run concurrently. Any storage failure
//! yields an empty list.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, warn};

use context_fusion_core::models::{
    FlashcardRecord, GoalRecord, NoteRecord, PersonalItem, PersonalKind,
};
use context_fusion_core::store::PersonalDataStore;

use crate::config::PersonalConfig;

/// Per-category caps.
#[derive(Debug, Clone, Copy)]
pub struct PersonalCaps {
    pub max_notes: usize,
    pub max_flashcards: usize,
    pub max_goals: usize,
}

impl From<&PersonalConfig> for PersonalCaps {
    fn from(config: &PersonalConfig) -> Self {
        Self {
            max_notes: config.max_notes,
            max_flashcards: config.max_flashcards,
            max_goals: config.max_goals,
        }
    }
}

impl Default for PersonalCaps {
    fn default() -> Self {
        Self::from(&PersonalConfig::default())
    }
}

pub struct PersonalKnowledgeSource {
    store: Arc<dyn PersonalDataStore>,
    caps: PersonalCaps,
}

impl PersonalKnowledgeSource {
    pub fn new(store: Arc<dyn PersonalDataStore>, caps: PersonalCaps) -> Self {
        Self { store, caps }
    }

    /// Notes, then flashcards, then goals, each newest first and capped.
    pub async fn retrieve(&self, user_id: &str) -> Vec<PersonalItem> {
        match self.fetch(user_id).await {
            Ok(items) => {
                debug!(user_id, count = items.len(), "personal knowledge fetched");
                items
            }
            Err(e) => {
                warn!(user_id, error = %e, "personal knowledge fetch failed");
                Vec::new()
            }
        }
    }

    async fn fetch(&self, user_id: &str) -> Result<Vec<PersonalItem>> {
        let (notes, flashcards, goals) = tokio::try_join!(
            self.store.recent_notes(user_id, self.caps.max_notes),
            self.store.recent_flashcards(user_id, self.caps.max_flashcards),
            self.store.active_goals(user_id, self.caps.max_goals),
        )?;

        // The store's limit is advisory; enforce ordering and caps here.
        let notes = capped(notes, |n| n.created_at, self.caps.max_notes);
        let flashcards = capped(flashcards, |f| f.created_at, self.caps.max_flashcards);
        let goals = capped(goals, |g| g.created_at, self.caps.max_goals);

        let mut items = Vec::with_capacity(notes.len() + flashcards.len() + goals.len());
        items.extend(notes.iter().map(note_item));
        items.extend(flashcards.iter().map(flashcard_item));
        items.extend(goals.iter().map(goal_item));
        Ok(items)
    }
}

fn capped<T>(mut records: Vec<T>, created: impl Fn(&T) -> DateTime<Utc>, limit: usize) -> Vec<T> {
    records.sort_by_key(|r| std::cmp::Reverse(created(r)));
    records.truncate(limit);
    records
}

fn note_item(note: &NoteRecord) -> PersonalItem {
    PersonalItem {
        kind: PersonalKind::Note,
        title: note.title.clone(),
        content: note.content.clone(),
        metadata: json!({
            "id": note.id,
            "category": note.category,
            "tags": note.tags,
            "created_at": note.created_at.to_rfc3339(),
        }),
    }
}

fn flashcard_item(card: &FlashcardRecord) -> PersonalItem {
    PersonalItem {
        kind: PersonalKind::Flashcard,
        title: card.front.clone(),
        content: format!("Q: {}\nA: {}", card.front, card.back),
        metadata: json!({
            "id": card.id,
            "times_reviewed": card.times_reviewed,
            "times_correct": card.times_correct,
            "accuracy": accuracy(card),
            "last_reviewed_at": card.last_reviewed_at.map(|t| t.to_rfc3339()),
        }),
    }
}

fn goal_item(goal: &GoalRecord) -> PersonalItem {
    let mut content = goal.title.clone();
    if let Some(description) = goal.description.as_deref().filter(|d| !d.is_empty()) {
        content.push_str(": ");
        content.push_str(description);
    }
    PersonalItem {
        kind: PersonalKind::Goal,
        title: goal.title.clone(),
        content,
        metadata: json!({
            "id": goal.id,
            "progress": goal.progress,
            "priority": goal.priority,
            "status": goal.status,
            "target_date": goal.target_date,
        }),
    }
}

/// Share of correct reviews in `[0, 1]`; `None` for unreviewed cards.
fn accuracy(card: &FlashcardRecord) -> Option<f64> {
    if card.times_reviewed <= 0 {
        return None;
    }
    Some((card.times_correct as f64 / card.times_reviewed as f64).clamp(0.0, 1.0))
}
