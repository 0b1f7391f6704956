//! Context chains: bounded per-ancestor memory for generation prompts.
//!
//! A node at depth `d` carries exactly `d` digests, one per ancestor, root
//! first. Digests hold a title, a capped summary and the characters present,
//! never the chapter text, so prompt size stays bounded however deep the
//! tree grows.

use crate::model::{ContextEntry, StoryBible, StoryNode};
use crate::store::{StoreError, StoryStore};

/// Maximum characters kept in a digest summary.
pub const MAX_SUMMARY_CHARS: usize = 280;

/// Excerpt used when the generator gave no summary.
///
/// Always strictly shorter than `content`.
pub fn excerpt(content: &str) -> String {
    let content = content.trim();
    let total = content.chars().count();
    if total == 0 {
        return String::new();
    }
    let budget = MAX_SUMMARY_CHARS.min(total / 2);
    // The ellipsis takes a character too.
    if budget == 0 || budget + 1 >= total {
        return String::new();
    }

    let cut: String = content.chars().take(budget).collect();
    let cut = match cut.rfind(char::is_whitespace) {
        Some(pos) if pos > budget / 2 => cut[..pos].to_string(),
        _ => cut,
    };
    format!("{}…", cut.trim_end())
}

/// Cap a generator-supplied summary.
fn cap_summary(summary: &str, content: &str) -> String {
    let summary = summary.trim();
    if summary.is_empty() || summary == content.trim() {
        return excerpt(content);
    }
    if summary.chars().count() <= MAX_SUMMARY_CHARS {
        return summary.to_string();
    }
    let cut: String = summary.chars().take(MAX_SUMMARY_CHARS - 1).collect();
    format!("{}…", cut.trim_end())
}

/// Digest of a generated node.
pub fn digest(node: &StoryNode) -> ContextEntry {
    ContextEntry {
        key: node.key.clone(),
        title: node.title.clone(),
        summary: cap_summary(&node.summary, &node.content),
        characters_present: node.characters_present.clone(),
    }
}

/// Chain for a child of `parent`: the parent's chain plus its digest.
pub fn extend(parent: &StoryNode) -> Vec<ContextEntry> {
    let mut chain = parent.context_chain.clone();
    chain.push(digest(parent));
    chain
}

/// Rebuild a node's chain by walking parent edges in the store.
pub async fn rebuild(
    store: &dyn StoryStore,
    node: &StoryNode,
) -> Result<Vec<ContextEntry>, StoreError> {
    let mut chain = Vec::with_capacity(node.depth as usize);
    let mut incoming = node.parent_choice;

    while let Some(choice_id) = incoming {
        let choice = store
            .load_choice(choice_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("choice {choice_id}")))?;
        let parent = store
            .load_node(choice.from_node)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("node {}", choice.from_node)))?;
        chain.push(digest(&parent));
        incoming = parent.parent_choice;

        if chain.len() > node.depth as usize {
            return Err(StoreError::Internal(format!(
                "ancestry of node {} is deeper than its depth {}",
                node.key, node.depth
            )));
        }
    }

    chain.reverse();
    Ok(chain)
}

/// The chain to use for `node`: the stored one when it matches the node's
/// depth, otherwise a rebuilt one.
pub async fn resolve(
    store: &dyn StoryStore,
    node: &StoryNode,
) -> Result<Vec<ContextEntry>, StoreError> {
    if node.context_chain.len() == node.depth as usize {
        return Ok(node.context_chain.clone());
    }
    tracing::warn!(
        node_key = %node.key,
        stored = node.context_chain.len(),
        depth = node.depth,
        "context chain does not match depth, rebuilding"
    );
    rebuild(store, node).await
}

/// "Story so far" section for chapter prompts.
pub fn render_story_so_far(chain: &[ContextEntry]) -> String {
    if chain.is_empty() {
        return "This is the opening chapter.".to_string();
    }
    let mut out = String::new();
    for (i, entry) in chain.iter().enumerate() {
        out.push_str(&format!("{}. {}", i + 1, entry.title));
        if !entry.summary.is_empty() {
            out.push_str(&format!(": {}", entry.summary));
        }
        if !entry.characters_present.is_empty() {
            out.push_str(&format!(" [{}]", entry.characters_present.join(", ")));
        }
        out.push('\n');
    }
    out
}

/// Characters to draw: those present now, falling back to the most recent
/// ancestor that listed any.
pub fn scene_characters(chain: &[ContextEntry], present: &[String]) -> Vec<String> {
    if !present.is_empty() {
        return present.to_vec();
    }
    chain
        .iter()
        .rev()
        .find(|e| !e.characters_present.is_empty())
        .map(|e| e.characters_present.clone())
        .unwrap_or_default()
}

/// Visual descriptors for the named characters, for image prompts.
pub fn render_character_block(bible: &StoryBible, names: &[String]) -> String {
    names
        .iter()
        .filter_map(|name| {
            bible
                .descriptor_for(name)
                .map(|descriptor| format!("{}: {}", name.trim(), descriptor))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EmotionalWeight, StoryChoice, StoryId};
    use crate::store::{ChildPlacement, InMemoryStoryStore};
    use chrono::Utc;

    fn written(mut node: StoryNode, title: &str, content: &str) -> StoryNode {
        node.title = title.to_string();
        node.content = content.to_string();
        node.characters_present = vec!["Mira".to_string()];
        node
    }

    #[test]
    fn test_excerpt_is_shorter_than_content() {
        let content = "The tide pulled back and left a map of silver lines on the sand.";
        let ex = excerpt(content);
        assert!(ex.chars().count() < content.chars().count());
        assert!(ex.ends_with('…'));
        assert_eq!(excerpt("Hi"), "");
        assert_eq!(excerpt("Hey"), "H…");
        assert_eq!(excerpt(""), "");
    }

    #[test]
    fn test_digest_never_holds_full_text() {
        let root = StoryNode::root(StoryId::new());
        let content = "word ".repeat(400);
        let mut node = written(root, "Opening", &content);
        node.summary = content.clone();

        let entry = digest(&node);
        assert!(entry.summary.chars().count() <= MAX_SUMMARY_CHARS);
        assert_ne!(entry.summary, content);
    }

    #[test]
    fn test_extend_grows_by_one() {
        let root = written(StoryNode::root(StoryId::new()), "Opening", "Once upon a time there was a coast.");
        let chain = extend(&root);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].key, "1");

        let choice = StoryChoice::new(&root, 0, "Go", "", EmotionalWeight::Medium);
        let child = written(
            StoryNode::placeholder(&root, &choice, chain),
            "Second",
            "The path climbed toward the lighthouse on the cliffs.",
        );
        let grandchild_chain = extend(&child);
        assert_eq!(grandchild_chain.len(), 2);
        assert_eq!(grandchild_chain[1].key, "1.1");
    }

    #[tokio::test]
    async fn test_rebuild_walks_ancestry() {
        let store = InMemoryStoryStore::new();
        let root = written(StoryNode::root(StoryId::new()), "Opening", "A long opening chapter text here.");
        store.insert_node(&root).await.unwrap();
        store.claim_node(root.id, Utc::now()).await.unwrap();

        let choice = StoryChoice::new(&root, 0, "Go", "", EmotionalWeight::Medium);
        let mut child = StoryNode::placeholder(&root, &choice, extend(&root));
        store
            .complete_node(
                &root,
                &[ChildPlacement {
                    choice,
                    node: child.clone(),
                }],
            )
            .await
            .unwrap();

        child.context_chain.clear();
        let rebuilt = resolve(&store, &child).await.unwrap();
        assert_eq!(rebuilt.len(), 1);
        assert_eq!(rebuilt[0].title, "Opening");
    }

    #[test]
    fn test_scene_characters_fallback() {
        let chain = vec![ContextEntry {
            key: "1".to_string(),
            title: "Opening".to_string(),
            summary: String::new(),
            characters_present: vec!["Mira".to_string()],
        }];
        assert_eq!(scene_characters(&chain, &[]), vec!["Mira".to_string()]);
        assert_eq!(
            scene_characters(&chain, &["Tomas".to_string()]),
            vec!["Tomas".to_string()]
        );
    }

    #[test]
    fn test_render_story_so_far() {
        assert_eq!(render_story_so_far(&[]), "This is the opening chapter.");
        let chain = vec![ContextEntry {
            key: "1".to_string(),
            title: "Opening".to_string(),
            summary: "Mira finds the map.".to_string(),
            characters_present: vec!["Mira".to_string()],
        }];
        assert_eq!(
            render_story_so_far(&chain),
            "1. Opening: Mira finds the map. [Mira]\n"
        );
    }
}
