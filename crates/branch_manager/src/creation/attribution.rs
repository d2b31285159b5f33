//! Matching AI responses to the models selected in the UI.

use crate::structs::ModelRef;

/// Index of the selected model a response attribution refers to.
///
/// Priority: exact id, case-insensitive id, then either name containing the
/// other (case-insensitive).
pub fn match_selected(model: &str, selected: &[ModelRef]) -> Option<usize> {
    if let Some(index) = selected.iter().position(|m| m.id == model) {
        return Some(index);
    }
    if let Some(index) = selected.iter().position(|m| m.id.eq_ignore_ascii_case(model)) {
        return Some(index);
    }

    let needle = model.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    selected.iter().position(|m| {
        let name = m.name.trim().to_lowercase();
        !name.is_empty() && (name.contains(&needle) || needle.contains(&name))
    })
}

/// Models to record on a new branch.
///
/// `claimed` holds the selected indices already given to siblings in the
/// same fan-out; the chosen index is pushed onto it. Unmatched responses take
/// the first unclaimed selected model and wrap around only once every one is
/// taken. Without a selection, the response's own model is used, then
/// `inherited`.
pub fn resolve_models(
    response_model: Option<&str>,
    selected: &[ModelRef],
    claimed: &mut Vec<usize>,
    inherited: &[ModelRef],
) -> Vec<ModelRef> {
    if let Some(index) = response_model.and_then(|model| match_selected(model, selected)) {
        claimed.push(index);
        return vec![selected[index].clone()];
    }
    if !selected.is_empty() {
        let index = (0..selected.len())
            .find(|i| !claimed.contains(i))
            .unwrap_or(claimed.len() % selected.len());
        claimed.push(index);
        return vec![selected[index].clone()];
    }
    if let Some(model) = response_model {
        return vec![ModelRef::new(model, model)];
    }
    inherited.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selected() -> Vec<ModelRef> {
        vec![
            ModelRef::new("gpt-4o", "GPT-4o"),
            ModelRef::new("claude-sonnet", "Claude Sonnet"),
            ModelRef::new("gemini", "Gemini Pro"),
        ]
    }

    #[test]
    fn match_priority() {
        let models = selected();
        assert_eq!(match_selected("claude-sonnet", &models), Some(1));
        assert_eq!(match_selected("GPT-4O", &models), Some(0));
        assert_eq!(match_selected("gemini pro", &models), Some(2));
        assert_eq!(match_selected("claude", &models), Some(1));
        assert_eq!(match_selected("llama", &models), None);
        assert_eq!(match_selected("  ", &models), None);
    }

    #[test]
    fn exact_id_beats_name_substring() {
        let models = vec![
            ModelRef::new("gpt-mini", "gpt"),
            ModelRef::new("gpt", "Other"),
        ];
        assert_eq!(match_selected("gpt", &models), Some(1));
    }

    #[test]
    fn unmatched_responses_take_unclaimed_models_first() {
        let models = selected();
        let mut claimed = Vec::new();
        assert_eq!(resolve_models(Some("claude"), &models, &mut claimed, &[])[0].id, "claude-sonnet");
        assert_eq!(resolve_models(Some("llama"), &models, &mut claimed, &[])[0].id, "gpt-4o");
        assert_eq!(resolve_models(None, &models, &mut claimed, &[])[0].id, "gemini");
        // Every selected model is taken: wrap around.
        assert_eq!(resolve_models(None, &models, &mut claimed, &[])[0].id, "gpt-4o");
        assert_eq!(claimed, vec![1, 0, 2, 0]);
    }

    #[test]
    fn never_empty_while_anything_is_known() {
        assert_eq!(resolve_models(Some("llama"), &[], &mut Vec::new(), &[])[0].id, "llama");

        let inherited = vec![ModelRef::new("gpt-4o", "GPT-4o")];
        assert_eq!(resolve_models(None, &[], &mut Vec::new(), &inherited), inherited);
    }
}
