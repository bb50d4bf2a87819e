//! Navigation resolver
//!
//! Computes the element that follows the current one in a course's
//! definition order, and module-relative targets: restart the current
//! module, skip to the next one, or walk back to the previous one. A
//! module is the group of elements sharing the token before the first `_`
//! in their id; ids without `_` form singleton modules.

use sdk::errors::EngineError;
use tracing::info;

use crate::course::{CourseDefinition, CourseSource};
use crate::element::{ElementKind, ElementSpec};

/// Module token of an element id
pub fn module_token(id: &str) -> &str {
    match id.find('_') {
        Some(i) => &id[..i],
        None => id,
    }
}

/// The element immediately following `current_id` in definition order
///
/// Elements of unimplemented types are skipped; `None` means the course is
/// complete.
pub fn next<'a>(
    course: &'a CourseDefinition,
    current_id: &str,
) -> Option<(&'a str, &'a ElementSpec)> {
    let mut passed_current = false;
    for (id, spec) in course.iter() {
        if passed_current && !matches!(spec.kind, ElementKind::Unknown) {
            return Some((id, spec));
        }
        if id == current_id {
            passed_current = true;
        }
    }
    None
}

/// Module-relative navigation target
///
/// - `shift == 0`: the canonical first element of the current module,
///   `{module}_0` (or `{id}0` when the id has no underscore). Idempotent.
/// - `shift == +1`: the first element past the current module's boundary;
///   the last element of the course when no boundary follows.
/// - `shift == -1`: the first element of the module preceding the current
///   one; from the very last element a synthetic end-boundary makes the
///   walk land on the start of the final module.
///
/// When no other module boundary exists the unchanged `current_id` comes
/// back — a documented "stay" fallback, not an error. The reverse walk is
/// not implemented for database-backed definitions and says so.
pub fn module_shift(
    course: &CourseDefinition,
    current_id: &str,
    shift: i8,
) -> Result<String, EngineError> {
    let module = module_token(current_id);

    if shift == 0 {
        let target = if current_id.contains('_') {
            format!("{}_0", module)
        } else {
            format!("{}0", module)
        };
        info!(from = %current_id, to = %target, "restarting module");
        return Ok(target);
    }

    if shift < 0 && course.source == CourseSource::Database {
        return Err(EngineError::Unsupported(
            "previous-module navigation is not implemented for database-backed courses"
                .to_string(),
        ));
    }

    let mut keys: Vec<String> = course.ids().map(|id| id.to_string()).collect();
    let mut prev_module: Option<String> = None;

    if shift < 0 {
        keys.reverse();
        if keys.first().map(|k| k.as_str()) == Some(current_id) {
            // The course is over; simulate a module past the end so the
            // walk settles on the start of the final module.
            let synthetic = format!("{}END", module);
            keys.insert(0, format!("{}_0", synthetic));
            prev_module = Some(synthetic);
        }
    }

    let last_i = keys.len() - 1;
    let mut in_current_module = false;

    for (i, key) in keys.iter().enumerate() {
        let token = module_token(key);
        if token == module {
            in_current_module = true;
        }

        if shift > 0 {
            if in_current_module && (token != module || i == last_i) {
                info!(from = %current_id, to = %key, "moving to next module");
                return Ok(key.clone());
            }
        } else if in_current_module && token != module {
            match &prev_module {
                None => prev_module = Some(token.to_string()),
                Some(prev) if prev != token => {
                    info!(from = %current_id, to = %keys[i - 1], "moving to previous module");
                    return Ok(keys[i - 1].clone());
                }
                Some(_) if i == last_i => {
                    info!(from = %current_id, to = %key, "moving to previous module");
                    return Ok(key.clone());
                }
                Some(_) => {}
            }
        }
    }

    // No other module boundary: stay where we are.
    Ok(current_id.to_string())
}
