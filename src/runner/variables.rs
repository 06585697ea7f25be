//! Variable combination and interpolation for task runs.
//!
//! Users are allowed to include special interpolation strings in their variable values
//! (ex. `pipeline_secret{{ api_key }}`) which are substituted with values from the secret
//! or object stores just before a task's container is started.

use crate::models::{object, secret, Variable, VariableSource};
use crate::runner::RunnerState;
use crate::secret_store::SecretStoreError;
use crate::{models::run, models::task, object_store::ObjectStoreError, storage};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use strum::{Display, EnumString};

pub fn run_specific_api_key_id(run_id: u64) -> String {
    format!("gofer_api_token_{run_id}")
}

/// Format a reference to a pipeline secret the way user pipeline configs write them.
pub fn pipeline_secret(key: &str) -> String {
    format!("pipeline_secret{{{{{key}}}}}")
}

/// We need to combine the environment variables we get from multiple sources in order to
/// pass them finally to the task run. The order in which they are passed is very important
/// as they can and should overwrite each other, even though the intention of prefixing the
/// environment variables is to prevent the chance of overwriting.
///
/// There are many places a task run could potentially get env vars from:
/// 1) Right before the task run starts, from the service itself.
/// 2) At the time of run inception, either by the user manually or an extension.
/// 3) From the pipeline's configuration file.
///
/// The order in which the env vars are stacked are as such:
/// 1) We first pass in the system specific env vars as these are the most replaceable on the
///    totem pole.
/// 2) Then the task specific env vars defined by the user in the pipeline config.
/// 3) Lastly the run specific env vars. These are usually provided by either an extension or
///    the user when they attempt to start a new run manually. Since these are the most
///    likely to be edited adhoc they are treated as the most important.
pub fn combine_variables(run: &run::Run, task: &task::Task) -> Vec<Variable> {
    let system_injected_vars = system_injected_vars(run, task, task.inject_api_token);

    let task_vars: HashMap<String, Variable> = task
        .variables
        .iter()
        .map(|variable| (variable.key.to_uppercase(), variable.clone()))
        .collect();

    let run_vars: HashMap<String, Variable> = run
        .variables
        .iter()
        .map(|variable| (variable.key.to_uppercase(), variable.clone()))
        .collect();

    let mut task_run_vars = system_injected_vars; // System provided env vars first.
    task_run_vars.extend(task_vars); // then vars that come from the pipeline config.
    task_run_vars.extend(run_vars); // then finally vars that come from the user or extension.

    // It is possible for the user to enter an empty key, but that would be an error when
    // attempting to pass it to the container.
    task_run_vars
        .into_iter()
        .filter_map(|(key, value)| if key.is_empty() { None } else { Some(value) })
        .collect()
}

/// On every run the service injects some vars that are determined by the system.
/// These are usually meant to give the user some basic information that they can pull
/// into their program about the details of the run.
fn system_injected_vars(
    run: &run::Run,
    task: &task::Task,
    inject_api_token: bool,
) -> HashMap<String, Variable> {
    let mut vars = HashMap::from([
        (
            "GOFER_PIPELINE_ID".to_string(),
            Variable {
                key: "GOFER_PIPELINE_ID".to_string(),
                value: run.pipeline_id.clone(),
                source: VariableSource::System,
            },
        ),
        (
            "GOFER_RUN_ID".to_string(),
            Variable {
                key: "GOFER_RUN_ID".to_string(),
                value: run.run_id.to_string(),
                source: VariableSource::System,
            },
        ),
        (
            "GOFER_TASK_ID".to_string(),
            Variable {
                key: "GOFER_TASK_ID".to_string(),
                value: task.id.clone(),
                source: VariableSource::System,
            },
        ),
        (
            "GOFER_TASK_IMAGE".to_string(),
            Variable {
                key: "GOFER_TASK_IMAGE".to_string(),
                value: task.image.clone(),
                source: VariableSource::System,
            },
        ),
    ]);

    if inject_api_token {
        vars.insert(
            "GOFER_API_TOKEN".into(),
            Variable {
                key: "GOFER_API_TOKEN".into(),
                value: pipeline_secret(&run_specific_api_key_id(run.run_id)),
                source: VariableSource::System,
            },
        );
    }

    vars
}

/// The supported interpolation prefixes. Users include these in pipeline manifests to pull
/// values from the built-in stores at task launch time.
#[derive(Debug, Display, EnumString, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum InterpolationKind {
    Unknown,

    /// pipeline_secret{{\<key\>}}
    PipelineSecret,

    /// global_secret{{\<key\>}}
    GlobalSecret,

    /// run_object{{\<key\>}}
    RunObject,

    /// pipeline_object{{\<key\>}}
    PipelineObject,
}

/// Checks a string for the existence of an interpolation format. ex: "pipeline_secret{{ example }}".
/// If an interpolation was found we return Some, if not (the string was just a plain string)
/// we return None.
///
/// Within the Some type is the kind of interpolation that was found and secondly the key
/// found within.
///
/// Surrounding whitespace around both the full value and the inner key is stripped before
/// matching. Exactly one interpolation happens per value; there is no recursive expansion.
pub fn parse_interpolation_syntax(raw_input: &str) -> Option<(InterpolationKind, String)> {
    let mut raw_input = raw_input.trim();

    let bracket_index = raw_input.find("{{")?;

    let interpolation_name_str = &raw_input[..bracket_index];
    let interpolation_kind = match InterpolationKind::from_str(interpolation_name_str) {
        Ok(kind) => kind,
        Err(_) => return None,
    };

    let interpolation_prefix = format!("{}{{{{", interpolation_kind.to_string().to_lowercase());
    let interpolation_suffix = "}}";
    if raw_input.starts_with(&interpolation_prefix) && raw_input.ends_with(interpolation_suffix) {
        raw_input = raw_input.strip_prefix(&interpolation_prefix).unwrap();
        raw_input = raw_input.strip_suffix(interpolation_suffix).unwrap();
        return Some((interpolation_kind, raw_input.trim().to_string()));
    }

    None
}

/// Takes a list of mixed plaintext and interpolation-referencing variables and returns the
/// list with each reference replaced by the fetched value for its store.
///
/// The 'run_id' is optional here since interpolation is used in two separate contexts. The
/// first is when we process a new run, in which case there might be run specific objects
/// that need to be resolved. The second is during pipeline subscription registration where
/// no run exists; referencing a run object there is an error.
///
/// A missing key is an error naming the interpolation kind and the key. Values that match no
/// interpolation prefix pass through untouched.
pub async fn interpolate_vars(
    state: &RunnerState,
    namespace_id: &str,
    pipeline_id: &str,
    run_id: Option<u64>,
    variables: &[Variable],
) -> Result<Vec<Variable>> {
    let mut variable_list = vec![];

    for variable in variables {
        // If it's not an interpolated var we simply add it to the list and move on.
        let (interpolation_kind, key) = match parse_interpolation_syntax(&variable.value) {
            Some((k, v)) => (k, v),
            None => {
                variable_list.push(variable.to_owned());
                continue;
            }
        };

        match interpolation_kind {
            InterpolationKind::Unknown => {
                variable_list.push(variable.to_owned());
            }
            InterpolationKind::PipelineSecret => {
                let value = match state
                    .secret_store
                    .get(&secret::pipeline_secret_store_key(
                        namespace_id,
                        pipeline_id,
                        &key,
                    ))
                    .await
                {
                    Ok(val) => String::from_utf8_lossy(&val).to_string(),
                    Err(SecretStoreError::NotFound) => {
                        bail!("Could not find pipeline_secret '{}'", key);
                    }
                    Err(e) => {
                        bail!(
                            "Encountered error while retrieving pipeline_secret '{}'; {:#?}",
                            key,
                            e
                        );
                    }
                };

                variable_list.push(Variable {
                    key: variable.key.clone(),
                    value,
                    source: VariableSource::Secret,
                });
            }
            InterpolationKind::GlobalSecret => {
                let retrieved_key_metadata = {
                    let conn = match state.storage.read_conn() {
                        Ok(conn) => conn,
                        Err(e) => {
                            bail!("Could not establish a connection to the database during interpolation; {:#?}", e);
                        }
                    };

                    match storage::secret_store_global_keys::get(&conn, &key) {
                        Ok(val) => val,
                        Err(storage::StorageError::NotFound) => {
                            bail!("Could not find global_secret '{}'", key);
                        }
                        Err(e) => {
                            bail!("Encountered error while retrieving global_secret '{}'; {:#?}", key, e);
                        }
                    }
                };

                let key_metadata: secret::Secret = match retrieved_key_metadata.try_into() {
                    Ok(secret) => secret,
                    Err(e) => {
                        bail!(
                            "Could not parse global secret metadata during interpolation; {:#?}",
                            e
                        );
                    }
                };

                if !key_metadata.is_allowed_namespace(namespace_id) {
                    bail!(
                        "global_secret '{}' cannot be used from namespace '{}'; valid namespaces: {:#?}",
                        key_metadata.key,
                        namespace_id,
                        key_metadata.namespaces
                    );
                }

                let retrieved_value = match state
                    .secret_store
                    .get(&secret::global_secret_store_key(&key_metadata.key))
                    .await
                {
                    Ok(val) => val,
                    Err(SecretStoreError::NotFound) => {
                        bail!("Could not find global_secret '{}'", key_metadata.key);
                    }
                    Err(e) => {
                        bail!("Could not retrieve global_secret '{}'; {:#?}", key, e);
                    }
                };

                variable_list.push(Variable {
                    key: variable.key.clone(),
                    value: String::from_utf8_lossy(&retrieved_value).to_string(),
                    source: VariableSource::Secret,
                });
            }
            InterpolationKind::PipelineObject => {
                let retrieved_value = match state
                    .object_store
                    .get(&object::pipeline_object_store_key(
                        namespace_id,
                        pipeline_id,
                        &key,
                    ))
                    .await
                {
                    Ok(val) => val,
                    Err(ObjectStoreError::NotFound) => {
                        bail!("Could not find pipeline_object '{}'", key);
                    }
                    Err(e) => {
                        bail!("Could not retrieve pipeline_object '{}'; {:#?}", key, e);
                    }
                };

                // We attempt to stringify the object to insert it into the environment.
                let stringified_object = String::from_utf8_lossy(&retrieved_value);

                variable_list.push(Variable {
                    key: variable.key.clone(),
                    value: stringified_object.to_string(),
                    source: variable.source.clone(),
                });
            }
            InterpolationKind::RunObject => {
                let run_id = match run_id {
                    Some(run_id) => run_id,
                    None => {
                        bail!(
                            "run_object '{}' can only be used within the context of a run",
                            key
                        );
                    }
                };

                let retrieved_value = match state
                    .object_store
                    .get(&object::run_object_store_key(
                        namespace_id,
                        pipeline_id,
                        run_id,
                        &key,
                    ))
                    .await
                {
                    Ok(val) => val,
                    Err(ObjectStoreError::NotFound) => {
                        bail!("Could not find run_object '{}'", key);
                    }
                    Err(e) => {
                        bail!("Could not retrieve run_object '{}'; {:#?}", key, e);
                    }
                };

                let stringified_object = String::from_utf8_lossy(&retrieved_value);

                variable_list.push(Variable {
                    key: variable.key.clone(),
                    value: stringified_object.to_string(),
                    source: variable.source.clone(),
                });
            }
        };
    }

    Ok(variable_list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::run::{Initiator, InitiatorType, Run};

    #[test]
    fn parse_interpolation_syntax_matches() {
        let (kind, key) = parse_interpolation_syntax("pipeline_secret{{ api_key }}").unwrap();
        assert!(matches!(kind, InterpolationKind::PipelineSecret));
        assert_eq!(key, "api_key");

        let (kind, key) = parse_interpolation_syntax("  run_object{{result}}  ").unwrap();
        assert!(matches!(kind, InterpolationKind::RunObject));
        assert_eq!(key, "result");
    }

    #[test]
    fn parse_interpolation_syntax_passes_plain_strings() {
        assert!(parse_interpolation_syntax("just a value").is_none());
        assert!(parse_interpolation_syntax("secret{{ nope }}").is_none());
        assert!(parse_interpolation_syntax("pipeline_secret{{ unclosed").is_none());
    }

    #[test]
    fn combined_variables_respect_priority() {
        let run = Run::new(
            "default",
            "simple",
            1,
            1,
            Initiator {
                kind: InitiatorType::Human,
                name: "tester".into(),
                reason: "testing".into(),
            },
            vec![Variable {
                key: "SHARED".into(),
                value: "from_run".into(),
                source: VariableSource::RunOptions,
            }],
        );

        let task = task::Task::new("first_task", "ubuntu:latest")
            .variable("SHARED", "from_task")
            .variable("TASK_ONLY", "value");

        let combined = combine_variables(&run, &task);

        let shared = combined.iter().find(|v| v.key == "SHARED").unwrap();
        assert_eq!(shared.value, "from_run");

        let task_only = combined.iter().find(|v| v.key == "TASK_ONLY").unwrap();
        assert_eq!(task_only.value, "value");

        // System vars always present.
        assert!(combined.iter().any(|v| v.key == "GOFER_PIPELINE_ID"));
        assert!(combined.iter().any(|v| v.key == "GOFER_RUN_ID"));
    }

    #[test]
    fn api_token_injected_only_on_request() {
        let run = Run::new(
            "default",
            "simple",
            1,
            12,
            Initiator {
                kind: InitiatorType::Human,
                name: "tester".into(),
                reason: "testing".into(),
            },
            vec![],
        );

        let mut task = task::Task::new("first_task", "ubuntu:latest");
        let combined = combine_variables(&run, &task);
        assert!(!combined.iter().any(|v| v.key == "GOFER_API_TOKEN"));

        task.inject_api_token = true;
        let combined = combine_variables(&run, &task);

        let token_var = combined
            .iter()
            .find(|v| v.key == "GOFER_API_TOKEN")
            .unwrap();
        assert_eq!(token_var.value, "pipeline_secret{{gofer_api_token_12}}");
    }
}
