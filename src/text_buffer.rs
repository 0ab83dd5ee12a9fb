//! Turns the transcribed word stream into commands.
//! Speech arrives in arbitrary fragments ("knight", "e", "4" or "knight e4"),
//! so words accumulate in a buffer until a prefix of it matches a grammar.

use crate::board::PieceKind;
use crate::command::{Command, MoveCommand, PlainCommand};
use tracing::debug;

/// Phrases the recognizer commonly hears instead of chess vocabulary.
const DEFAULT_SUBSTITUTIONS: &[(&str, &str)] = &[
    ("ninety", "knight e"), // "ninety four" is "knight e4" said quickly
    ("rookie", "rook e"),
    ("brooke", "rook"),
    ("brook", "rook"),
    ("night", "knight"),
    ("nite", "knight"),
    ("knights", "knight"),
    ("bishops", "bishop"),
    ("queens", "queen"),
    ("kings", "king"),
    ("pawns", "pawn"),
    ("pond", "pawn"),
    ("prawn", "pawn"),
    ("one", "1"),
    ("won", "1"),
    ("two", "2"),
    ("too", "to"),
    ("three", "3"),
    ("four", "4"),
    ("for", "4"),
    ("fore", "4"),
    ("five", "5"),
    ("six", "6"),
    ("seven", "7"),
    ("eight", "8"),
    ("ate", "8"),
    ("bee", "b"),
    ("be", "b"),
    ("see", "c"),
    ("sea", "c"),
    ("dee", "d"),
    ("ef", "f"),
    ("at", "f"),
    ("gee", "g"),
    ("age", "h"),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TokenType {
    Piece,
    File,
    Rank,
    To,
    Plain,
}

impl TokenType {
    fn matches(self, token: &str) -> bool {
        match self {
            TokenType::Piece => PieceKind::from_word(token).is_some(),
            TokenType::File => token.len() == 1 && matches!(token.as_bytes()[0], b'a'..=b'h'),
            TokenType::Rank => token.len() == 1 && matches!(token.as_bytes()[0], b'1'..=b'8'),
            TokenType::To => token == "to" || token == "2",
            TokenType::Plain => PlainCommand::from_word(token).is_some(),
        }
    }
}

const GRAMMARS: &[&[TokenType]] = &[
    &[TokenType::Piece, TokenType::File, TokenType::Rank],
    &[TokenType::Piece, TokenType::To, TokenType::File, TokenType::Rank],
    &[
        TokenType::Piece,
        TokenType::File,
        TokenType::Rank,
        TokenType::To,
        TokenType::File,
        TokenType::Rank,
    ],
    &[TokenType::Plain],
];

/// Words allowed to open a command.
fn is_start_token(token: &str) -> bool {
    TokenType::Piece.matches(token) || TokenType::Plain.matches(token)
}

/// Splits on whitespace and separates every digit into its own token:
/// `"knight e4"` becomes `["knight", "e", "4"]`.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split_whitespace() {
        let mut letters = String::new();
        for c in word.chars() {
            if c.is_ascii_digit() {
                if !letters.is_empty() {
                    tokens.push(std::mem::take(&mut letters));
                }
                tokens.push(c.to_string());
            } else {
                letters.push(c);
            }
        }
        if !letters.is_empty() {
            tokens.push(letters);
        }
    }
    tokens
}

#[derive(Debug, Clone)]
pub struct CommandTextBuffer {
    tokens: Vec<String>,
    substitutions: Vec<(Vec<String>, String)>,
    cancelled: bool,
}

impl Default for CommandTextBuffer {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl CommandTextBuffer {
    /// `extra` substitutions are tried before the built-in table.
    pub fn new(extra: &[(String, String)]) -> Self {
        let substitutions = extra
            .iter()
            .map(|(from, to)| (from.as_str(), to.as_str()))
            .chain(DEFAULT_SUBSTITUTIONS.iter().copied())
            .map(|(from, to)| {
                let phrase = from.split_whitespace().map(str::to_lowercase).collect();
                (phrase, to.to_lowercase())
            })
            .filter(|(phrase, _): &(Vec<String>, String)| !phrase.is_empty())
            .collect();
        Self { tokens: Vec::new(), substitutions, cancelled: false }
    }

    #[cfg(test)]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
        self.cancelled = false;
    }

    /// Adds freshly transcribed text and returns the buffer for echoing.
    pub fn add_text(&mut self, raw_text: &str) -> &[String] {
        debug!(before = ?self.tokens, raw_text, "adding text");
        self.cancelled = false;

        let cleaned: String = raw_text
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect();
        let mut new_tokens = tokenize(&self.substitute(&cleaned));

        // "cancel" drops the command in progress and everything said before it
        if let Some(pos) = new_tokens.iter().rposition(|t| t == "cancel") {
            new_tokens.drain(..=pos);
            self.tokens.clear();
            self.cancelled = true;
        }

        if self.tokens.is_empty() {
            match new_tokens.iter().position(|t| is_start_token(t)) {
                Some(first) => {
                    new_tokens.drain(..first);
                }
                None => new_tokens.clear(),
            }
        }

        // a new command interrupts the old one
        if new_tokens.first().is_some_and(|t| is_start_token(t)) {
            self.tokens.clear();
        }
        self.tokens.extend(new_tokens);

        if self.tokens.first().is_some_and(|t| !is_start_token(t)) {
            self.tokens.clear();
        }

        debug!(after = ?self.tokens, "text added");
        &self.tokens
    }

    /// Extracts the command at the front of the buffer, if one is complete.
    /// A cancel in the most recent text is reported first.
    pub fn get_command(&mut self) -> Option<Command> {
        if std::mem::take(&mut self.cancelled) {
            return Some(Command::Plain {
                command: PlainCommand::Cancel,
                tokens: vec!["cancel".to_string()],
            });
        }

        let mut alive: Vec<&[TokenType]> = GRAMMARS.to_vec();
        let mut matched: Option<&[TokenType]> = None;
        let mut index = 0;

        while index < self.tokens.len() && !alive.is_empty() {
            let token = self.tokens[index].as_str();
            alive.retain(|grammar| grammar.get(index).is_some_and(|ty| ty.matches(token)));

            if token == "2"
                && alive.iter().any(|g| g.get(index) == Some(&TokenType::To))
                && !alive.iter().any(|g| g.get(index) == Some(&TokenType::Rank))
            {
                self.tokens[index] = "to".to_string();
            }

            if let Some(done) = alive.iter().find(|g| g.len() == index + 1) {
                matched = Some(*done);
            }
            alive.retain(|grammar| grammar.len() > index + 1);
            index += 1;
        }

        let grammar = matched?;
        let prefix = &self.tokens[..grammar.len()];
        let command = if grammar[0] == TokenType::Plain {
            PlainCommand::from_word(&prefix[0]).map(|command| Command::Plain {
                command,
                tokens: prefix.to_vec(),
            })
        } else {
            MoveCommand::from_tokens(prefix).map(Command::Move)
        }?;

        self.tokens.drain(..grammar.len());
        debug!(command = %command.text(), remaining = ?self.tokens, "command extracted");
        Some(command)
    }

    fn substitute(&self, text: &str) -> String {
        let words: Vec<&str> = text.split_whitespace().collect();
        let mut out: Vec<&str> = Vec::with_capacity(words.len());
        let mut i = 0;
        'words: while i < words.len() {
            for (phrase, replacement) in &self.substitutions {
                let rest = &words[i..];
                if rest.len() >= phrase.len() && phrase.iter().zip(rest).all(|(p, w)| p == w) {
                    out.push(replacement.as_str());
                    i += phrase.len();
                    continue 'words;
                }
            }
            out.push(words[i]);
            i += 1;
        }
        out.join(" ")
    }
}
