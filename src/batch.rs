use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Hard limit on the number of scenes in a single order.
pub const PROVIDER_MAX_BATCH: usize = 500;

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    pub name: String,
    /// 1-based position of this batch in the plan.
    pub index: usize,
    pub count: usize,
    pub item_ids: Vec<String>,
}

/// Sorts the unique ids and splits them into named batches of at most `chunk_size`.
///
/// Lexicographic order groups scenes acquired close together, and makes the
/// batch names stable across runs for the same search.
pub fn plan_batches<I, S>(ids: I, chunk_size: usize, basename: &str) -> Result<Vec<Batch>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    check_chunk_size(chunk_size)?;

    let unique: Vec<String> = ids
        .into_iter()
        .map(Into::into)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let count = unique.len().div_ceil(chunk_size);
    let batches = unique
        .chunks(chunk_size)
        .enumerate()
        .map(|(i, chunk)| Batch {
            name: batch_name(basename, i + 1, count),
            index: i + 1,
            count,
            item_ids: chunk.to_vec(),
        })
        .collect();
    Ok(batches)
}

pub fn check_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 || chunk_size > PROVIDER_MAX_BATCH {
        return Err(Error::Configuration(format!(
            "Chunk size must be between 1 and {PROVIDER_MAX_BATCH}, got {chunk_size}"
        )));
    }
    Ok(())
}

pub fn batch_name(basename: &str, index: usize, count: usize) -> String {
    format!("{basename}_chunk_{index}_of_{count}")
}

/// Substitutes `{key}` placeholders in an order name template.
pub fn render_basename(template: &str, params: &HashMap<&str, String>) -> Result<String> {
    let re = Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("Regex pattern should always compile");

    if let Some(unknown) = re
        .captures_iter(template)
        .map(|c| c.extract::<1>().1[0])
        .find(|key| !params.contains_key(key))
    {
        return Err(Error::Configuration(format!(
            "Unknown placeholder {{{unknown}}} in order name template"
        )));
    }

    let rendered = re.replace_all(template, |caps: &regex::Captures| {
        params
            .get(&caps[1])
            .cloned()
            .unwrap_or_default()
    });
    if rendered.trim().is_empty() {
        return Err(Error::Configuration("Order name template renders empty".to_string()));
    }
    Ok(rendered.into_owned())
}
