//! Players of a session.
//!
//! Players are appended in join order and never removed. Names are unique
//! per session, compared after trimming and case-folding, so "Ada" and
//! " ada " cannot both join.

use std::collections::HashMap;

use quizcast_protocol::{PlayerId, PlayerView};

use crate::QuizError;

/// A participant and their running score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    /// Never decreases.
    pub score: u32,
    /// Whether a connection is attached right now. False from join until
    /// the first attach.
    pub connected: bool,
    /// Whether a connection was ever attached. Tells a first attach apart
    /// from a reconnect.
    pub ever_connected: bool,
    /// Position in join order, from 0.
    pub join_order: u64,
    /// Scoring sequence number of the answer that produced the current
    /// score; `None` until the player first scores.
    pub scored_at: Option<u64>,
}

impl Player {
    pub fn view(&self) -> PlayerView {
        PlayerView {
            player_id: self.id,
            name: self.name.clone(),
            score: self.score,
            connected: self.connected,
        }
    }
}

#[derive(Debug, Default)]
pub struct Roster {
    players: Vec<Player>,
    index: HashMap<PlayerId, usize>,
    names: HashMap<String, PlayerId>,
}

fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a player. Player ids are assigned sequentially from 1.
    ///
    /// # Errors
    /// - [`QuizError::InvalidName`] for blank or over-long names
    /// - [`QuizError::NameTaken`] if the name is already in use
    pub fn add(&mut self, name: &str, max_len: usize) -> Result<&Player, QuizError> {
        let display = name.trim();
        if display.is_empty() {
            return Err(QuizError::InvalidName("name is empty".into()));
        }
        if display.chars().count() > max_len {
            return Err(QuizError::InvalidName(format!(
                "name longer than {max_len} characters"
            )));
        }
        let key = name_key(display);
        if self.names.contains_key(&key) {
            return Err(QuizError::NameTaken(display.to_string()));
        }

        let position = self.players.len();
        let id = PlayerId(position as u64 + 1);
        self.players.push(Player {
            id,
            name: display.to_string(),
            score: 0,
            connected: false,
            ever_connected: false,
            join_order: position as u64,
            scored_at: None,
        });
        self.index.insert(id, position);
        self.names.insert(key, id);
        Ok(&self.players[position])
    }

    pub fn get(&self, id: PlayerId) -> Option<&Player> {
        self.index.get(&id).map(|&i| &self.players[i])
    }

    pub fn get_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.index.get(&id).map(|&i| &mut self.players[i])
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.index.contains_key(&id)
    }

    /// Players in join order.
    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.iter()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn connected_count(&self) -> usize {
        self.players.iter().filter(|p| p.connected).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_assigns_sequential_ids_and_join_order() {
        let mut roster = Roster::new();
        let a = roster.add("Ada", 24).unwrap().id;
        let b = roster.add("Brian", 24).unwrap().id;

        assert_eq!(a, PlayerId(1));
        assert_eq!(b, PlayerId(2));
        assert_eq!(roster.get(b).unwrap().join_order, 1);
        assert_eq!(roster.len(), 2);
    }

    #[test]
    fn test_add_duplicate_name_case_insensitive_returns_name_taken() {
        let mut roster = Roster::new();
        roster.add("Ada", 24).unwrap();

        let result = roster.add("  aDa ", 24);

        assert!(matches!(result, Err(QuizError::NameTaken(name)) if name == "aDa"));
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_add_trims_display_name() {
        let mut roster = Roster::new();
        let player = roster.add("  Grace  ", 24).unwrap();
        assert_eq!(player.name, "Grace");
    }

    #[test]
    fn test_add_rejects_blank_and_long_names() {
        let mut roster = Roster::new();
        assert!(matches!(roster.add("   ", 24), Err(QuizError::InvalidName(_))));
        assert!(matches!(roster.add("abcdef", 5), Err(QuizError::InvalidName(_))));
        assert!(roster.is_empty());
    }

    #[test]
    fn test_new_player_starts_disconnected() {
        let mut roster = Roster::new();
        let player = roster.add("Ada", 24).unwrap();
        assert!(!player.connected);
        assert!(!player.ever_connected);
    }

    #[test]
    fn test_connected_count_tracks_flags() {
        let mut roster = Roster::new();
        let a = roster.add("a", 24).unwrap().id;
        roster.add("b", 24).unwrap();
        assert_eq!(roster.connected_count(), 0);
        roster.get_mut(a).unwrap().connected = true;
        assert_eq!(roster.connected_count(), 1);
    }
}
