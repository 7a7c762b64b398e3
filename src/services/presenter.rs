use crate::models::{Message, Role};
use crate::services::session::ChatSession;

/// "n/total" indicator shown on user messages that have been edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchIndicator {
    pub position: u32,
    pub total: u32,
    pub previous_id: Option<String>,
    pub next_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderItem {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub reasoning: Option<String>,
    pub model_name: Option<String>,
    pub editable: bool,
    pub branch: Option<BranchIndicator>,
}

pub fn render_items(session: &ChatSession) -> Vec<RenderItem> {
    session
        .visible_path()
        .into_iter()
        .map(|msg| render_item(msg, &session.peers(&msg.id)))
        .collect()
}

fn render_item(msg: &Message, peers: &[&Message]) -> RenderItem {
    let branch = match msg.role {
        Role::User if peers.len() > 1 => {
            let position = msg.slot().number();
            let find = |n: u32| {
                peers
                    .iter()
                    .find(|p| p.slot().number() == n)
                    .map(|p| p.id.clone())
            };
            Some(BranchIndicator {
                position,
                total: peers.len() as u32,
                previous_id: position.checked_sub(1).and_then(find),
                next_id: find(position + 1),
            })
        }
        _ => None,
    };

    RenderItem {
        id: msg.id.clone(),
        role: msg.role,
        content: msg.content.clone(),
        reasoning: msg.reasoning.clone(),
        model_name: msg.model_name.clone(),
        editable: msg.role == Role::User,
        branch,
    }
}
