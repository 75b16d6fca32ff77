/*
 * dispatch.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Magma, a multi-protocol mail server.
 *
 * Magma is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Magma is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Magma.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Command tables. Every text protocol routes input lines through the
//! same contract: a table sorted at construction, a case-insensitive
//! binary search, prefix matching for verbs that take same-line
//! arguments, exact matching otherwise, and the longest verb winning
//! when several match.


/// How a verb consumes the rest of the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// The verb is the entire line.
    Exact,
    /// Arguments follow the verb on the same line.
    Prefix,
}

/// One command table entry.
#[derive(Debug, Clone)]
pub struct Command<H> {
    pub verb: &'static str,
    pub kind: MatchKind,
    pub handler: H,
    verb_lower: String,
}

/// Sorted command table for one protocol.
pub struct CommandTable<H> {
    entries: Vec<Command<H>>,
}

impl<H: Copy> CommandTable<H> {
    /// Build and sort the table. Verbs must not be strict prefixes of
    /// one another; the search relies on it.
    pub fn new(commands: &[(&'static str, MatchKind, H)]) -> Self {
        let mut entries: Vec<Command<H>> = commands
            .iter()
            .map(|(verb, kind, handler)| Command {
                verb,
                kind: *kind,
                handler: *handler,
                verb_lower: verb.to_ascii_lowercase(),
            })
            .collect();
        entries.sort_by(|a, b| a.verb_lower.cmp(&b.verb_lower));
        for pair in entries.windows(2) {
            debug_assert!(
                !pair[1].verb_lower.starts_with(&pair[0].verb_lower),
                "verb {:?} is a prefix of {:?}",
                pair[0].verb,
                pair[1].verb
            );
        }
        Self { entries }
    }

    /// Match a client line against the table. Returns the entry and the
    /// argument remainder (with one leading separator trimmed).
    pub fn lookup<'a>(&self, line: &'a str) -> Option<(&Command<H>, &'a str)> {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            return None;
        }
        let lower = trimmed.to_ascii_lowercase();

        let found = self
            .entries
            .binary_search_by(|entry| {
                let probe = &lower.as_bytes()[..lower.len().min(entry.verb_lower.len())];
                entry.verb_lower.as_bytes().cmp(probe)
            })
            .ok()?;

        // Expand across the contiguous run of matches and keep the
        // longest verb that satisfies its own match kind.
        let mut best: Option<&Command<H>> = None;
        let mut index = found;
        while index > 0 && self.matches_at(index - 1, &lower) {
            index -= 1;
        }
        while index < self.entries.len() && self.matches_at(index, &lower) {
            let entry = &self.entries[index];
            let acceptable = match entry.kind {
                MatchKind::Exact => lower == entry.verb_lower,
                MatchKind::Prefix => true,
            };
            if acceptable && best.map(|b| entry.verb.len() > b.verb.len()).unwrap_or(true) {
                best = Some(entry);
            }
            index += 1;
        }

        let entry = best?;
        let args = trimmed[entry.verb.len().min(trimmed.len())..]
            .strip_prefix(' ')
            .unwrap_or(&trimmed[entry.verb.len().min(trimmed.len())..]);
        Some((entry, args))
    }

    fn matches_at(&self, index: usize, lower: &str) -> bool {
        let verb = &self.entries[index].verb_lower;
        lower.len() >= verb.len() && &lower.as_bytes()[..verb.len()] == verb.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Verb {
        Quit,
        Stat,
        List,
        Starttls,
        Stls,
        MailFrom,
        AuthPlain,
        AuthLogin,
    }

    fn table() -> CommandTable<Verb> {
        CommandTable::new(&[
            ("QUIT", MatchKind::Exact, Verb::Quit),
            ("STAT", MatchKind::Exact, Verb::Stat),
            ("LIST", MatchKind::Prefix, Verb::List),
            ("STARTTLS", MatchKind::Exact, Verb::Starttls),
            ("STLS", MatchKind::Exact, Verb::Stls),
            ("MAIL FROM", MatchKind::Prefix, Verb::MailFrom),
            ("AUTH PLAIN", MatchKind::Prefix, Verb::AuthPlain),
            ("AUTH LOGIN", MatchKind::Prefix, Verb::AuthLogin),
        ])
    }

    #[test]
    fn exact_and_case_insensitive() {
        let table = table();
        assert_eq!(table.lookup("quit").unwrap().0.handler, Verb::Quit);
        assert_eq!(table.lookup("QUIT").unwrap().0.handler, Verb::Quit);
        assert_eq!(table.lookup("Stat\r\n").unwrap().0.handler, Verb::Stat);
        // Exact verbs reject trailing arguments.
        assert!(table.lookup("QUIT now").is_none());
    }

    #[test]
    fn prefix_carries_arguments() {
        let table = table();
        let (entry, args) = table.lookup("LIST 2").unwrap();
        assert_eq!(entry.handler, Verb::List);
        assert_eq!(args, "2");

        let (entry, args) = table.lookup("mail from:<a@example.com>").unwrap();
        assert_eq!(entry.handler, Verb::MailFrom);
        assert_eq!(args, ":<a@example.com>");
    }

    #[test]
    fn longest_match_wins() {
        let table = table();
        let (entry, args) = table.lookup("AUTH PLAIN AGJvYgBwdw==").unwrap();
        assert_eq!(entry.handler, Verb::AuthPlain);
        assert_eq!(args, "AGJvYgBwdw==");
        assert_eq!(table.lookup("auth login").unwrap().0.handler, Verb::AuthLogin);
    }

    #[test]
    fn near_misses_fail() {
        let table = table();
        assert!(table.lookup("STARTTL").is_none());
        assert!(table.lookup("NOOP").is_none());
        assert!(table.lookup("").is_none());
        // STLS and STARTTLS stay distinct.
        assert_eq!(table.lookup("STLS").unwrap().0.handler, Verb::Stls);
        assert_eq!(table.lookup("STARTTLS").unwrap().0.handler, Verb::Starttls);
    }

    #[test]
    fn every_verb_resolves_to_itself() {
        let table = table();
        for (line, expected) in [
            ("QUIT", Verb::Quit),
            ("STAT", Verb::Stat),
            ("LIST", Verb::List),
            ("STARTTLS", Verb::Starttls),
            ("STLS", Verb::Stls),
            ("MAIL FROM", Verb::MailFrom),
            ("AUTH PLAIN", Verb::AuthPlain),
            ("AUTH LOGIN", Verb::AuthLogin),
        ] {
            assert_eq!(table.lookup(line).unwrap().0.handler, expected, "verb {}", line);
        }
    }
}
