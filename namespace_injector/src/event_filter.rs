use std::collections::HashSet;

use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::watcher;
use kube::ResourceExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Create,
    Update,
    Delete,
    Generic,
}

/// A lifecycle signal for a single namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceEvent {
    pub kind: EventKind,
    pub name: String,
}

impl NamespaceEvent {
    pub fn new(kind: EventKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

/// Only namespace creation reaches the reconciler. The resource needs to be
/// materialized once, at namespace birth.
pub fn admit(event: &NamespaceEvent) -> bool {
    event.kind == EventKind::Create
}

/// Turns raw watch events into create/update/delete signals.
///
/// The watcher only reports "applied" objects, so the classifier remembers
/// which names it has seen. A name seen for the first time (including during
/// the initial listing) is a `Create`, later sightings are `Update`s. When the
/// watch relists, names missing from the new listing are reported as `Delete`.
///
/// Events from a listing are held back until `InitDone`. A reflector store
/// fed by the same watch only publishes the listing at that point, so a
/// signal emitted earlier could name an object the store does not hold yet.
#[derive(Debug, Default)]
pub struct EventClassifier {
    known: HashSet<String>,
    relisting: Option<Relist>,
}

#[derive(Debug, Default)]
struct Relist {
    listed: HashSet<String>,
    held: Vec<NamespaceEvent>,
}

impl EventClassifier {
    pub fn classify(&mut self, event: watcher::Event<Namespace>) -> Vec<NamespaceEvent> {
        match event {
            watcher::Event::Init => {
                self.relisting = Some(Relist::default());
                Vec::new()
            }
            watcher::Event::InitApply(namespace) => {
                let name = namespace.name_any();
                let event = self.applied(name.clone());
                match self.relisting.as_mut() {
                    Some(relist) => {
                        relist.listed.insert(name);
                        relist.held.push(event);
                        Vec::new()
                    }
                    None => vec![event],
                }
            }
            watcher::Event::InitDone => {
                let Some(relist) = self.relisting.take() else {
                    return Vec::new();
                };
                let mut gone: Vec<String> = self
                    .known
                    .iter()
                    .filter(|name| !relist.listed.contains(*name))
                    .cloned()
                    .collect();
                gone.sort();

                let mut events = relist.held;
                for name in gone {
                    self.known.remove(&name);
                    events.push(NamespaceEvent::new(EventKind::Delete, name));
                }
                events
            }
            watcher::Event::Apply(namespace) => vec![self.applied(namespace.name_any())],
            watcher::Event::Delete(namespace) => {
                let name = namespace.name_any();
                self.known.remove(&name);
                vec![NamespaceEvent::new(EventKind::Delete, name)]
            }
        }
    }

    fn applied(&mut self, name: String) -> NamespaceEvent {
        if self.known.insert(name.clone()) {
            NamespaceEvent::new(EventKind::Create, name)
        } else {
            NamespaceEvent::new(EventKind::Update, name)
        }
    }
}
