//! Aggregate catalog: empty-state factories and event name/type bindings.
//!
//! Registration is explicit and typed: applications list their aggregates
//! and events at startup through [`AggregateRegistry::register`]. The
//! registry then serves two lookups at runtime: the replay path resolves a
//! record's `event_title` to a decode-and-apply function, and subscribers
//! validate handler bindings against the same name/type map.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A consistency boundary whose state is derived by replaying events.
///
/// The implementing type is the aggregate's state. Business decisions live
/// in command closures passed to the sourcing service; this trait only
/// covers identity and the empty state.
pub trait Aggregate:
    Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Aggregate type name; also the event table this type is stored in.
    const KIND: &'static str;

    /// Empty state for an aggregate that has no events yet (version 0).
    fn empty(id: &str) -> Self;
}

/// An immutable fact about a state change of aggregate `A`.
///
/// `NAME` is the wire discriminator persisted as `event_title`; it must be
/// unique across the whole registry.
pub trait Event<A: Aggregate>: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;

    /// Fold this event into the state. Must be pure and total.
    fn apply_to(&self, state: &mut A);
}

/// Errors raised by registration and lookup.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The event name is already bound to a different concrete type.
    #[error("event '{name}' is already registered to aggregate '{owner}' with a different type")]
    DuplicateRegistration { name: String, owner: String },

    #[error("aggregate '{kind}' is not registered")]
    NotRegistered { kind: String },

    /// A stored record carries a title no registered event matches.
    #[error("no event registered under title '{title}' for aggregate '{kind}'")]
    UnknownEventTitle { title: String, kind: String },

    #[error("event payload codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

type ApplyFn<A> = fn(&str, &mut A) -> Result<(), serde_json::Error>;

fn decode_and_apply<A: Aggregate, E: Event<A>>(
    payload: &str,
    state: &mut A,
) -> Result<(), serde_json::Error> {
    let event: E = serde_json::from_str(payload)?;
    event.apply_to(state);
    Ok(())
}

/// What one event name resolves to.
struct EventOwner {
    kind: &'static str,
    type_id: TypeId,
}

/// Per-aggregate registration: the empty-state factory plus the
/// title -> apply bindings used during replay.
pub struct AggregateEntry<A: Aggregate> {
    events: HashMap<&'static str, ApplyFn<A>>,
}

impl<A: Aggregate> AggregateEntry<A> {
    fn new() -> Self {
        Self {
            events: HashMap::new(),
        }
    }

    /// Empty state at version 0 for the given id.
    pub fn empty_state(&self, id: &str) -> A {
        A::empty(id)
    }

    /// Decode a stored record's payload by title and fold it into `state`.
    pub fn apply_record(
        &self,
        state: &mut A,
        record: &crate::record::EventRecord,
    ) -> Result<(), RegistryError> {
        let apply = self.events.get(record.event_title.as_str()).ok_or_else(|| {
            RegistryError::UnknownEventTitle {
                title: record.event_title.clone(),
                kind: A::KIND.to_string(),
            }
        })?;
        apply(&record.payload, state)?;
        Ok(())
    }

    /// Whether an event title is registered for this aggregate.
    pub fn has_event(&self, name: &str) -> bool {
        self.events.contains_key(name)
    }

    pub fn ensure_registered(&self, name: &str) -> Result<(), RegistryError> {
        if self.has_event(name) {
            Ok(())
        } else {
            Err(RegistryError::UnknownEventTitle {
                title: name.to_string(),
                kind: A::KIND.to_string(),
            })
        }
    }
}

impl<A: Aggregate> fmt::Debug for AggregateEntry<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut events: Vec<_> = self.events.keys().collect();
        events.sort_unstable();
        f.debug_struct("AggregateEntry")
            .field("kind", &A::KIND)
            .field("events", &events)
            .finish()
    }
}

/// Typed registrar handed to the configuration closure of
/// [`AggregateRegistry::register`].
pub struct EventRegistrar<'a, A: Aggregate> {
    events: &'a mut HashMap<&'static str, ApplyFn<A>>,
    owners: &'a mut HashMap<&'static str, EventOwner>,
}

impl<A: Aggregate> EventRegistrar<'_, A> {
    /// Bind event type `E` under its `NAME`.
    ///
    /// Re-binding the same concrete type is a merge no-op; binding a name
    /// already owned by a different type fails.
    pub fn event<E: Event<A>>(&mut self) -> Result<&mut Self, RegistryError> {
        let type_id = TypeId::of::<E>();
        if let Some(owner) = self.owners.get(E::NAME) {
            if owner.type_id != type_id {
                return Err(RegistryError::DuplicateRegistration {
                    name: E::NAME.to_string(),
                    owner: owner.kind.to_string(),
                });
            }
            return Ok(self);
        }
        self.owners.insert(
            E::NAME,
            EventOwner {
                kind: A::KIND,
                type_id,
            },
        );
        self.events.insert(E::NAME, decode_and_apply::<A, E>);
        Ok(self)
    }
}

/// Catalog of registered aggregate types.
///
/// Owned by the application and passed explicitly (usually behind an `Arc`)
/// to the sourcing service and subscribers; immutable after bootstrap.
#[derive(Default)]
pub struct AggregateRegistry {
    entries: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
    owners: HashMap<&'static str, EventOwner>,
}

impl AggregateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register aggregate `A` and its events.
    ///
    /// Calling again for the same aggregate merges additional events into
    /// the existing entry.
    pub fn register<A, F>(&mut self, configure: F) -> Result<(), RegistryError>
    where
        A: Aggregate,
        F: FnOnce(&mut EventRegistrar<'_, A>) -> Result<(), RegistryError>,
    {
        let slot = self
            .entries
            .entry(A::KIND)
            .or_insert_with(|| Box::new(AggregateEntry::<A>::new()));
        let entry = slot.downcast_mut::<AggregateEntry<A>>().ok_or_else(|| {
            RegistryError::DuplicateRegistration {
                name: A::KIND.to_string(),
                owner: "a different aggregate type".to_string(),
            }
        })?;
        let mut registrar = EventRegistrar {
            events: &mut entry.events,
            owners: &mut self.owners,
        };
        configure(&mut registrar)
    }

    /// Look up the registration for aggregate `A`.
    pub fn lookup<A: Aggregate>(&self) -> Result<&AggregateEntry<A>, RegistryError> {
        self.entries
            .get(A::KIND)
            .and_then(|entry| entry.downcast_ref::<AggregateEntry<A>>())
            .ok_or_else(|| RegistryError::NotRegistered {
                kind: A::KIND.to_string(),
            })
    }
}

#[cfg(test)]
mod tests;
