//! Combination building: expands per-variable value sets into the matrix of
//! variable assignments that defines a batch, and derives display/file names
//! for each expanded job.

use uuid::Uuid;

use crate::models::job::{GenerationMode, ImagePayload, JobDescriptor};
use crate::services::template::{apply_variables, Assignment};

/// Maximum length of a sanitized filename fragment.
const MAX_FILENAME_LEN: usize = 50;

/// Separator between the base name and each `name-value` pair.
const NAME_SEPARATOR: &str = "__";

/// Cartesian product over all variables that have at least one value.
///
/// Variables with an empty value set are dropped from the product entirely;
/// if every set is empty the result is a single empty assignment. The
/// rightmost variable advances fastest, like a mixed-radix counter, so the
/// output order is deterministic.
pub fn build_combinations(value_sets: &[(String, Vec<String>)]) -> Vec<Assignment> {
    let populated: Vec<&(String, Vec<String>)> = value_sets
        .iter()
        .filter(|(_, values)| !values.is_empty())
        .collect();

    if populated.is_empty() {
        return vec![Assignment::new()];
    }

    let mut indices = vec![0usize; populated.len()];
    let mut combos = Vec::new();

    loop {
        let mut combo = Assignment::new();
        for (slot, (name, values)) in populated.iter().enumerate() {
            combo.set(name.clone(), values[indices[slot]].clone());
        }
        combos.push(combo);

        // Advance the counter, rightmost digit first.
        let mut pos = populated.len();
        loop {
            if pos == 0 {
                return combos;
            }
            pos -= 1;
            indices[pos] += 1;
            if indices[pos] < populated[pos].1.len() {
                break;
            }
            indices[pos] = 0;
        }
    }
}

/// Valid row-linked combinations plus the count of rows that were partially
/// filled and therefore excluded.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LinkedCombinations {
    pub combos: Vec<Assignment>,
    pub incomplete: usize,
}

/// Row-by-row combination building for linked mode.
///
/// Values are trimmed; rows where every variable is empty are silently
/// skipped, rows where only some variables are filled count as `incomplete`
/// (for caller-side warnings) and produce no combination. Row order is
/// preserved.
pub fn build_linked_combinations(
    rows: &[Assignment],
    variables: &[String],
) -> LinkedCombinations {
    let mut result = LinkedCombinations::default();

    for row in rows {
        let mut cleaned = Assignment::new();
        let mut has_any_value = false;
        let mut has_all_values = true;

        for name in variables {
            let value = row.get(name).unwrap_or("").trim().to_string();
            if value.is_empty() {
                has_all_values = false;
            } else {
                has_any_value = true;
            }
            cleaned.set(name.clone(), value);
        }

        if !has_any_value {
            continue;
        }
        if !has_all_values {
            result.incomplete += 1;
            continue;
        }
        result.combos.push(cleaned);
    }

    result
}

/// Derive a display name from an optional input file name and an assignment.
///
/// The base name loses its extension (`generated` when absent), then each
/// `name-value` pair is appended in assignment order, values sanitized.
pub fn make_display_name(input_name: Option<&str>, assignment: &Assignment) -> String {
    let mut base = input_name.map(strip_extension).unwrap_or("generated").to_string();

    if !assignment.is_empty() {
        let suffix: Vec<String> = assignment
            .iter()
            .map(|(name, value)| format!("{}-{}", name, sanitize_filename(value)))
            .collect();
        base = format!("{}{}{}", base, NAME_SEPARATOR, suffix.join(NAME_SEPARATOR));
    }

    base
}

/// Strip a trailing `.ext` where `ext` contains no further `.` or `/`.
fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx + 1 < name.len() && !name[idx + 1..].contains('/') => &name[..idx],
        _ => name,
    }
}

/// Make a string safe for use in a filename.
///
/// Trims, collapses whitespace runs to a single underscore, drops every
/// character outside `[A-Za-z0-9_.-]` and caps the length. Deterministic;
/// reused for both display names and archive entry names.
pub fn sanitize_filename(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_FILENAME_LEN));
    let mut pending_space = false;
    for c in input.trim().chars() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space {
            out.push('_');
            pending_space = false;
        }
        if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
            out.push(c);
        }
    }
    out.truncate(MAX_FILENAME_LEN);
    out
}

/// Pre-flight count of jobs a batch would submit, without building them.
pub fn count_jobs(
    value_sets: &[(String, Vec<String>)],
    input_count: usize,
    mode: GenerationMode,
) -> usize {
    let combos: usize = value_sets
        .iter()
        .filter(|(_, values)| !values.is_empty())
        .map(|(_, values)| values.len())
        .product();

    match mode {
        GenerationMode::Edit => combos * input_count,
        GenerationMode::Create => combos,
    }
}

/// An input image together with the file name it was uploaded under.
#[derive(Debug, Clone)]
pub struct NamedImage {
    pub name: String,
    pub image: ImagePayload,
}

/// Everything needed to expand one prompt into a batch of job descriptors.
#[derive(Debug, Clone)]
pub struct BatchSpec<'a> {
    pub prompt: &'a str,
    pub model: &'a str,
    pub quality: &'a str,
    pub size: Option<&'a str>,
    pub mode: GenerationMode,
    pub combos: Vec<Assignment>,
    /// Source images for edit mode; ignored in create mode.
    pub input_images: Vec<NamedImage>,
    /// Style-reference image shared by every job in the batch.
    pub ref_image: Option<ImagePayload>,
}

/// Expand a batch spec into one job descriptor per combination (create mode)
/// or per input-image × combination pair (edit mode, input-major order).
pub fn build_jobs(spec: &BatchSpec<'_>) -> Vec<JobDescriptor> {
    let mut jobs = Vec::new();

    match spec.mode {
        GenerationMode::Edit => {
            for input in &spec.input_images {
                for combo in &spec.combos {
                    jobs.push(make_job(spec, combo, Some(input)));
                }
            }
        }
        GenerationMode::Create => {
            for combo in &spec.combos {
                jobs.push(make_job(spec, combo, None));
            }
        }
    }

    jobs
}

fn make_job(
    spec: &BatchSpec<'_>,
    combo: &Assignment,
    input: Option<&NamedImage>,
) -> JobDescriptor {
    JobDescriptor {
        id: Uuid::new_v4(),
        display_name: make_display_name(input.map(|i| i.name.as_str()), combo),
        prompt: apply_variables(spec.prompt, combo),
        model: spec.model.to_string(),
        quality: spec.quality.to_string(),
        size: spec.size.map(str::to_string),
        mode: spec.mode,
        input_image: input.map(|i| i.image.clone()),
        ref_image: spec.ref_image.clone(),
    }
}
