//! Serializable delegate carrier.
//!
//! A test script and the state it captured travel to the boundary thread as
//! a message: the captured state is serialised on the caller's side,
//! deserialised and mutated on the far side, then serialised back together
//! with the script's result. The caller merges the returned state into its
//! own copy field by field. Only fields present on both sides with the same
//! JSON shape are synchronised; anything else is dropped silently.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::browsing::BrowsingSession;
use crate::error::{Error, Result};

type Body = Box<dyn FnOnce(Value, &mut BrowsingSession<'_>) -> Result<DelegateOutcome> + Send>;

/// What comes back across the boundary after a delegate ran.
#[derive(Debug, Clone, PartialEq)]
pub struct DelegateOutcome {
    pub result: Value,
    pub state: Value,
}

/// A script plus its captured state, ready to cross the boundary.
pub struct SerializableDelegate {
    state: Value,
    body: Body,
}

impl SerializableDelegate {
    /// Carry a script that captures nothing and returns nothing.
    pub fn action<F>(script: F) -> Self
    where
        F: FnOnce(&mut BrowsingSession<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            state: Value::Null,
            body: Box::new(move |_, session| {
                script(session).map_err(Error::script)?;
                Ok(DelegateOutcome {
                    result: Value::Null,
                    state: Value::Null,
                })
            }),
        }
    }

    /// Carry a script with captured state `S` producing `R`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the captured state cannot be serialised.
    pub fn capture<S, R, F>(state: &S, script: F) -> Result<Self>
    where
        S: Serialize + DeserializeOwned,
        R: Serialize,
        F: FnOnce(&mut S, &mut BrowsingSession<'_>) -> anyhow::Result<R> + Send + 'static,
    {
        let state = serde_json::to_value(state).map_err(|e| {
            Error::invalid_argument(format!("captured state is not serialisable: {e}"))
        })?;

        Ok(Self {
            state,
            body: Box::new(move |state, session| {
                let mut captured: S = serde_json::from_value(state).map_err(|e| {
                    Error::boundary(format!("captured state did not survive transfer: {e}"))
                })?;
                let result = script(&mut captured, session).map_err(Error::script)?;

                Ok(DelegateOutcome {
                    result: serde_json::to_value(result).map_err(|e| {
                        Error::script(anyhow::anyhow!("script result is not serialisable: {e}"))
                    })?,
                    state: serde_json::to_value(&captured).map_err(|e| {
                        Error::script(anyhow::anyhow!("captured state is not serialisable: {e}"))
                    })?,
                })
            }),
        })
    }

    /// Serialised form of the captured state as sent.
    pub fn state(&self) -> &Value {
        &self.state
    }

    /// Run the script against `session`. Called inside the boundary.
    ///
    /// # Errors
    ///
    /// Returns `ScriptExecution` if the script fails.
    pub fn invoke(self, session: &mut BrowsingSession<'_>) -> Result<DelegateOutcome> {
        (self.body)(self.state, session)
    }
}

impl std::fmt::Debug for SerializableDelegate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializableDelegate")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Merge state returned from the boundary into the caller's copy.
///
/// # Errors
///
/// Returns `Boundary` if the merged state no longer deserialises into `S`.
pub fn sync_closure_state<S>(local: &mut S, remote: Value) -> Result<()>
where
    S: Serialize + DeserializeOwned,
{
    let mut merged = serde_json::to_value(&*local)
        .map_err(|e| Error::boundary(format!("captured state is not serialisable: {e}")))?;
    merge_matching_fields(&mut merged, remote);
    *local = serde_json::from_value(merged)
        .map_err(|e| Error::boundary(format!("synchronised state is invalid: {e}")))?;
    Ok(())
}

/// Copy fields from `remote` into `local` where both sides have them.
///
/// Objects are merged one level deep by field name; any other value is
/// replaced wholesale when the shapes agree. `null` matches every shape so
/// optional fields can change between set and unset.
pub fn merge_matching_fields(local: &mut Value, remote: Value) {
    match (local, remote) {
        (Value::Object(local), Value::Object(remote)) => {
            for (name, value) in remote {
                if let Some(slot) = local.get_mut(&name)
                    && same_shape(slot, &value)
                {
                    *slot = value;
                }
            }
        },
        (local, remote) => {
            if same_shape(local, &remote) {
                *local = remote;
            }
        },
    }
}

fn same_shape(a: &Value, b: &Value) -> bool {
    a.is_null() || b.is_null() || std::mem::discriminant(a) == std::mem::discriminant(b)
}
