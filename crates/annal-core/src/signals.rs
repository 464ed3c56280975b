//! Lifecycle notifications — the post-save / post-delete stream the host
//! emits and history tracking subscribes to.

use std::{collections::BTreeMap, fmt, rc::Rc};

use crate::{Result, shadow::HistoryType, store::Store, value::Record};

/// A subscriber to one model's lifecycle notifications.
///
/// Subscriptions are strong: the hub owns its observers for the life of the
/// process. That is deliberate — the tracking declaration that creates an
/// observer is transient, so nothing else keeps it alive.
pub trait LifecycleObserver {
  fn post_save(
    &self,
    store: &dyn Store,
    record: &Record,
    kind: HistoryType,
  ) -> Result<()>;

  fn post_delete(&self, store: &dyn Store, record: &Record) -> Result<()>;
}

/// Dispatch hub for lifecycle notifications, keyed by model name.
#[derive(Default)]
pub struct SignalHub {
  observers: BTreeMap<String, Vec<Rc<dyn LifecycleObserver>>>,
}

impl fmt::Debug for SignalHub {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SignalHub")
      .field("models", &self.observers.keys().collect::<Vec<_>>())
      .finish()
  }
}

impl SignalHub {
  pub fn new() -> Self { Self::default() }

  /// Attach an observer to `model`'s post-save and post-delete streams.
  pub fn connect(&mut self, model: &str, observer: Rc<dyn LifecycleObserver>) {
    self.observers.entry(model.to_owned()).or_default().push(observer);
  }

  /// How many observers are attached to `model`.
  pub fn observer_count(&self, model: &str) -> usize {
    self.observers.get(model).map_or(0, Vec::len)
  }

  pub fn emit_post_save(
    &self,
    store: &dyn Store,
    record: &Record,
    kind: HistoryType,
  ) -> Result<()> {
    if let Some(observers) = self.observers.get(&record.model) {
      for observer in observers {
        observer.post_save(store, record, kind)?;
      }
    }
    Ok(())
  }

  pub fn emit_post_delete(
    &self,
    store: &dyn Store,
    record: &Record,
  ) -> Result<()> {
    if let Some(observers) = self.observers.get(&record.model) {
      for observer in observers {
        observer.post_delete(store, record)?;
      }
    }
    Ok(())
  }
}
