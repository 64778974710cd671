//! Local notification state with optimistic mutations.
//!
//! The visible list is always derived: the last server-confirmed
//! `baseline` with every pending mutation applied on top, in issue order.
//! Rolling a mutation back is therefore just dropping it and re-deriving,
//! and the unread count can never drift from the list.
//!
//! A fetch takes a [`FetchTicket`] when it starts. Pushes and confirmed
//! mutations that happen while any fetch is outstanding are journaled with
//! a logical timestamp, and replayed onto the fetched list when it lands, so
//! a response that left the server before those events cannot undo them.
//! Responses that land after a newer fetch was already applied are dropped.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

use super::mutation::Mutation;
use crate::notification::Notification;

/// Marks the start of a list fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FetchTicket(u64);

/// Handle to an in-flight optimistic mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutationId(u64);

#[derive(Debug, Clone)]
struct Pending {
    id: MutationId,
    mutation: Mutation,
}

#[derive(Debug, Clone)]
enum JournalEntry {
    Pushed(Notification),
    Confirmed(Mutation),
}

#[derive(Debug, Default)]
pub struct NotificationState {
    baseline: Vec<Notification>,
    pending: Vec<Pending>,
    view: Vec<Notification>,
    unread: usize,

    clock: u64,
    next_mutation: u64,
    in_flight: BTreeSet<u64>,
    last_applied: Option<u64>,
    journal: Vec<(u64, JournalEntry)>,
    /// Confirmed deletes, so a duplicate push cannot resurrect them.
    tombstones: HashMap<String, u64>,
}

impl NotificationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The visible list, newest first.
    pub fn items(&self) -> &[Notification] {
        &self.view
    }

    pub fn unread_count(&self) -> usize {
        self.unread
    }

    pub fn len(&self) -> usize {
        self.view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.view.iter().find(|n| n.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn has_fetch_in_flight(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// Whether marking `id` read needs a server round trip.
    ///
    /// False when the item is unknown, or already read with nothing left to
    /// settle. An item that only looks read because of a pending bulk mark
    /// still needs its own request.
    pub fn mark_read_required(&self, id: &str) -> bool {
        let Some(item) = self.get(id) else {
            return false;
        };
        if !item.is_read {
            return true;
        }

        let confirmed = self.baseline.iter().any(|n| n.id == id && n.is_read);
        let requested = self
            .pending
            .iter()
            .any(|p| p.mutation.target() == Some(id) && matches!(p.mutation, Mutation::MarkRead(_)));
        !(confirmed || requested)
    }

    pub fn begin_fetch(&mut self) -> FetchTicket {
        let at = self.tick();
        self.in_flight.insert(at);
        FetchTicket(at)
    }

    /// Replace the baseline with a fetched list.
    ///
    /// Returns false if a fetch that started later has already been applied,
    /// in which case `items` is discarded.
    pub fn apply_fetch(&mut self, ticket: FetchTicket, items: Vec<Notification>) -> bool {
        self.in_flight.remove(&ticket.0);
        if self.last_applied.is_some_and(|last| ticket.0 < last) {
            self.prune_journal();
            return false;
        }
        self.last_applied = Some(ticket.0);

        let mut baseline = normalize(items);
        for (_, entry) in self.journal.iter().filter(|(at, _)| *at > ticket.0) {
            match entry {
                JournalEntry::Pushed(n) => {
                    if !baseline.iter().any(|b| b.id == n.id) {
                        insert_sorted(&mut baseline, n.clone());
                    }
                }
                JournalEntry::Confirmed(mutation) => mutation.apply(&mut baseline),
            }
        }
        self.baseline = baseline;

        // A fetch that started after the delete was confirmed is authoritative.
        self.tombstones.retain(|_, at| *at > ticket.0);
        self.prune_journal();
        self.recompute();
        true
    }

    /// Forget a fetch that failed.
    pub fn abandon_fetch(&mut self, ticket: FetchTicket) {
        self.in_flight.remove(&ticket.0);
        self.prune_journal();
    }

    /// Merge a pushed notification. Returns false for duplicates and for
    /// notifications already deleted.
    pub fn insert_pushed(&mut self, notification: Notification) -> bool {
        if self.tombstones.contains_key(&notification.id)
            || self.baseline.iter().any(|n| n.id == notification.id)
        {
            return false;
        }

        self.record(JournalEntry::Pushed(notification.clone()));
        insert_sorted(&mut self.baseline, notification);
        self.recompute();
        true
    }

    /// Apply `mutation` optimistically.
    pub fn begin(&mut self, mutation: Mutation) -> MutationId {
        self.next_mutation += 1;
        let id = MutationId(self.next_mutation);
        self.pending.push(Pending { id, mutation });
        self.recompute();
        id
    }

    /// The server accepted the mutation; fold it into the baseline.
    pub fn confirm(&mut self, id: MutationId) -> Option<Mutation> {
        let mutation = self.take_pending(id)?;
        mutation.apply(&mut self.baseline);

        let at = self.tick();
        if let Mutation::Delete(target) = &mutation {
            self.tombstones.insert(target.clone(), at);
        }
        if self.has_fetch_in_flight() {
            self.journal.push((at, JournalEntry::Confirmed(mutation.clone())));
        }
        self.recompute();
        Some(mutation)
    }

    /// The server refused the mutation; drop it.
    pub fn rollback(&mut self, id: MutationId) -> Option<Mutation> {
        let mutation = self.take_pending(id)?;
        self.recompute();
        Some(mutation)
    }

    fn take_pending(&mut self, id: MutationId) -> Option<Mutation> {
        let pos = self.pending.iter().position(|p| p.id == id)?;
        Some(self.pending.remove(pos).mutation)
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn record(&mut self, entry: JournalEntry) {
        let at = self.tick();
        if self.has_fetch_in_flight() {
            self.journal.push((at, entry));
        }
    }

    /// Keep only entries some still-applicable fetch will need.
    fn prune_journal(&mut self) {
        let floor = self
            .in_flight
            .iter()
            .copied()
            .find(|t| self.last_applied.is_none_or(|last| *t >= last));
        match floor {
            Some(floor) => self.journal.retain(|(at, _)| *at > floor),
            None => self.journal.clear(),
        }
    }

    fn recompute(&mut self) {
        let mut view = self.baseline.clone();
        for pending in &self.pending {
            pending.mutation.apply(&mut view);
        }
        self.unread = view.iter().filter(|n| !n.is_read).count();
        self.view = view;
    }
}

fn normalize(mut items: Vec<Notification>) -> Vec<Notification> {
    items.sort_by(Notification::newest_first);
    let mut seen = HashSet::with_capacity(items.len());
    items.retain(|n| seen.insert(n.id.clone()));
    items
}

fn insert_sorted(items: &mut Vec<Notification>, notification: Notification) {
    let pos = items.partition_point(|n| Notification::newest_first(n, &notification) == Ordering::Less);
    items.insert(pos, notification);
}
