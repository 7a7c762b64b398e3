use crate::models::{Message, Role, Room};

/// Render the given path of `room` as a Markdown transcript.
pub fn export_to_markdown(room: &Room, path: &[&Message]) -> String {
    let mut output = format!("# {}\n\n", room.name);
    output.push_str(&format!("> Model: {}\n\n", room.model.id));
    if let Some(first) = path.first() {
        output.push_str(&format!(
            "> Date: {}\n\n",
            first.created_at.format("%Y-%m-%d %H:%M")
        ));
    }

    output.push_str("---\n\n");

    for msg in path {
        let role_label = match msg.role {
            Role::User => "You",
            Role::Assistant => msg.model_name.as_deref().unwrap_or("Assistant"),
        };
        output.push_str(&format!("### {}\n\n{}\n\n", role_label, msg.content));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LlmModel;

    #[test]
    fn test_export_labels() {
        let room = Room::new("Chat 1", LlmModel::bare("deepseek/deepseek-r1"));
        let question = Message::user(room.id.clone(), "Why is the sky blue?", 1);
        let mut answer = Message::pending_reply(question.id.clone(), "deepseek-r1");
        answer.content = "Rayleigh scattering.".to_string();

        let md = export_to_markdown(&room, &[&question, &answer]);

        assert!(md.starts_with("# Chat 1\n\n> Model: deepseek/deepseek-r1"));
        assert!(md.contains("### You\n\nWhy is the sky blue?"));
        assert!(md.contains("### deepseek-r1\n\nRayleigh scattering."));
    }
}
