//! Conversation history persistence.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use assist_core::{current_unix_timestamp_ms, write_text_atomic};
use assist_protocol::{Interaction, Message, MessageContentType, MessageType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const CONVERSATION_SCHEMA_VERSION: u32 = 1;

#[async_trait]
/// Trait contract for `ConversationStorage` behavior.
pub trait ConversationStorage: Send + Sync {
    async fn get_messages_from_interactions(
        &self,
        interactions: &[Interaction],
    ) -> Result<Vec<Message>> {
        Ok(interactions
            .iter()
            .flat_map(messages_from_interaction)
            .collect())
    }

    /// Inserts or replaces an interaction, keyed by `interaction_id`.
    async fn save_interaction(&self, interaction: &Interaction) -> Result<()>;

    /// Returns the interactions of a conversation in insertion order.
    async fn get_interactions(&self, conversation_id: &str) -> Result<Vec<Interaction>>;
}

/// Transcript messages for one interaction: the question as text, then the
/// answer as markdown traced to the parent interaction.
pub fn messages_from_interaction(interaction: &Interaction) -> Vec<Message> {
    let id = interaction.interaction_id.as_str();
    vec![
        Message {
            message_id: format!("{id}_0"),
            message_type: MessageType::Input,
            content_type: MessageContentType::Text,
            content: interaction.input.clone(),
            trace_id: None,
        },
        Message {
            message_id: format!("{id}_1"),
            message_type: MessageType::Output,
            content_type: MessageContentType::Markdown,
            content: interaction.response.clone(),
            trace_id: interaction.parent_interaction_id.clone(),
        },
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConversationFile {
    schema_version: u32,
    conversation_id: String,
    updated_unix_ms: u64,
    #[serde(default)]
    interactions: Vec<Interaction>,
}

/// Stores one JSON document per conversation under `<state_dir>/conversations/`.
#[derive(Debug)]
pub struct FileConversationStorage {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileConversationStorage {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            root: state_dir.as_ref().join("conversations"),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn conversation_path(&self, conversation_id: &str) -> Result<PathBuf> {
        if conversation_id.trim().is_empty() {
            bail!("conversation id cannot be empty");
        }
        let file_stem = encode_conversation_file_stem(conversation_id);
        Ok(self.root.join(format!("{file_stem}.json")))
    }

    fn load(&self, conversation_id: &str) -> Result<Option<ConversationFile>> {
        let path = self.conversation_path(conversation_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let file = serde_json::from_str::<ConversationFile>(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        if file.schema_version != CONVERSATION_SCHEMA_VERSION {
            bail!(
                "unsupported conversation schema version {} in {}",
                file.schema_version,
                path.display()
            );
        }
        if file.conversation_id != conversation_id {
            bail!(
                "{} belongs to conversation '{}', not '{}'",
                path.display(),
                file.conversation_id,
                conversation_id
            );
        }
        Ok(Some(file))
    }
}

#[async_trait]
impl ConversationStorage for FileConversationStorage {
    async fn save_interaction(&self, interaction: &Interaction) -> Result<()> {
        let conversation_id = interaction.conversation_id.as_str();
        let path = self.conversation_path(conversation_id)?;
        let _guard = match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut file = self.load(conversation_id)?.unwrap_or_else(|| ConversationFile {
            schema_version: CONVERSATION_SCHEMA_VERSION,
            conversation_id: conversation_id.to_string(),
            updated_unix_ms: 0,
            interactions: Vec::new(),
        });
        match file
            .interactions
            .iter_mut()
            .find(|existing| existing.interaction_id == interaction.interaction_id)
        {
            Some(existing) => *existing = interaction.clone(),
            None => file.interactions.push(interaction.clone()),
        }
        file.updated_unix_ms = current_unix_timestamp_ms();
        let mut payload =
            serde_json::to_string_pretty(&file).context("failed to encode conversation")?;
        payload.push('\n');
        write_text_atomic(&path, &payload)
    }

    async fn get_interactions(&self, conversation_id: &str) -> Result<Vec<Interaction>> {
        Ok(self
            .load(conversation_id)?
            .map(|file| file.interactions)
            .unwrap_or_default())
    }
}

/// Maps a conversation id to a file stem, one-to-one.
///
/// ASCII letters, digits and `-` pass through; every other byte, `_`
/// included, becomes `_` plus two lowercase hex digits.
fn encode_conversation_file_stem(conversation_id: &str) -> String {
    let mut stem = String::with_capacity(conversation_id.len());
    for byte in conversation_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("_{byte:02x}"));
        }
    }
    stem
}

#[cfg(test)]
mod tests {
    use assist_protocol::{Interaction, MessageContentType, MessageType};
    use tempfile::tempdir;

    use super::{
        encode_conversation_file_stem, messages_from_interaction, ConversationStorage,
        FileConversationStorage,
    };

    fn interaction(id: &str, response: &str) -> Interaction {
        Interaction {
            interaction_id: id.to_string(),
            conversation_id: "conv-1".to_string(),
            input: format!("question {id}"),
            response: response.to_string(),
            create_time: "2024-01-01T00:00:00.000Z".to_string(),
            parent_interaction_id: Some(format!("parent-{id}")),
        }
    }

    #[test]
    fn unit_messages_from_interaction_builds_input_and_output() {
        let messages = messages_from_interaction(&interaction("7", "answer"));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].message_id, "7_0");
        assert_eq!(messages[0].message_type, MessageType::Input);
        assert_eq!(messages[0].content_type, MessageContentType::Text);
        assert_eq!(messages[0].content, "question 7");
        assert_eq!(messages[1].message_id, "7_1");
        assert_eq!(messages[1].content_type, MessageContentType::Markdown);
        assert_eq!(messages[1].trace_id.as_deref(), Some("parent-7"));
    }

    #[test]
    fn unit_file_stem_encoding_escapes_path_characters() {
        assert_eq!(
            encode_conversation_file_stem("../etc/passwd"),
            "_2e_2e_2fetc_2fpasswd"
        );
        assert_eq!(encode_conversation_file_stem("abc-1_2"), "abc-1_5f2");
        assert_eq!(encode_conversation_file_stem("é"), "_c3_a9");
        assert_ne!(
            encode_conversation_file_stem("team.alpha"),
            encode_conversation_file_stem("team_alpha")
        );
    }

    #[tokio::test]
    async fn regression_ids_differing_in_escaped_characters_stay_separate() {
        let temp = tempdir().expect("tempdir");
        let storage = FileConversationStorage::new(temp.path());
        let mut dotted = interaction("1", "dotted answer");
        dotted.conversation_id = "team.alpha".to_string();
        dotted.input = "secret question".to_string();
        storage.save_interaction(&dotted).await.expect("save dotted");

        assert!(storage
            .get_interactions("team_alpha")
            .await
            .expect("load underscored")
            .is_empty());

        let mut underscored = interaction("2", "underscored answer");
        underscored.conversation_id = "team_alpha".to_string();
        storage
            .save_interaction(&underscored)
            .await
            .expect("save underscored");

        let dotted_history = storage.get_interactions("team.alpha").await.expect("load");
        assert_eq!(dotted_history.len(), 1);
        assert_eq!(dotted_history[0].input, "secret question");
        let underscored_history = storage.get_interactions("team_alpha").await.expect("load");
        assert_eq!(underscored_history.len(), 1);
        assert_eq!(underscored_history[0].response, "underscored answer");
    }

    #[tokio::test]
    async fn regression_file_for_another_conversation_is_rejected() {
        let temp = tempdir().expect("tempdir");
        let storage = FileConversationStorage::new(temp.path());
        storage
            .save_interaction(&interaction("1", "x"))
            .await
            .expect("save");
        std::fs::copy(
            storage.root().join("conv-1.json"),
            storage.root().join("conv-2.json"),
        )
        .expect("copy");
        let error = storage
            .get_interactions("conv-2")
            .await
            .expect_err("foreign file must fail");
        assert!(error.to_string().contains("belongs to conversation 'conv-1'"));
    }

    #[tokio::test]
    async fn functional_file_storage_upserts_and_preserves_order() {
        let temp = tempdir().expect("tempdir");
        let storage = FileConversationStorage::new(temp.path());
        storage
            .save_interaction(&interaction("1", ""))
            .await
            .expect("save first");
        storage
            .save_interaction(&interaction("2", "second"))
            .await
            .expect("save second");
        storage
            .save_interaction(&interaction("1", "first"))
            .await
            .expect("replace first");

        let interactions = storage.get_interactions("conv-1").await.expect("load");
        assert_eq!(interactions.len(), 2);
        assert_eq!(interactions[0].interaction_id, "1");
        assert_eq!(interactions[0].response, "first");
        assert_eq!(interactions[1].response, "second");
        assert!(temp.path().join("conversations").join("conv-1.json").is_file());

        let messages = storage
            .get_messages_from_interactions(&interactions)
            .await
            .expect("messages");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[3].content, "second");
    }

    #[tokio::test]
    async fn unit_unknown_conversation_has_no_interactions() {
        let temp = tempdir().expect("tempdir");
        let storage = FileConversationStorage::new(temp.path());
        assert!(storage
            .get_interactions("missing")
            .await
            .expect("load")
            .is_empty());
    }

    #[tokio::test]
    async fn regression_blank_conversation_id_is_rejected() {
        let temp = tempdir().expect("tempdir");
        let storage = FileConversationStorage::new(temp.path());
        let mut blank = interaction("1", "x");
        blank.conversation_id = "   ".to_string();
        let error = storage
            .save_interaction(&blank)
            .await
            .expect_err("blank id must fail");
        assert!(error.to_string().contains("cannot be empty"));
    }

    #[tokio::test]
    async fn regression_corrupt_file_surfaces_parse_error() {
        let temp = tempdir().expect("tempdir");
        let storage = FileConversationStorage::new(temp.path());
        std::fs::create_dir_all(storage.root()).expect("create root");
        std::fs::write(storage.root().join("conv-1.json"), "{oops").expect("write");
        let error = storage
            .get_interactions("conv-1")
            .await
            .expect_err("corrupt file must fail");
        assert!(format!("{error:#}").contains("failed to parse"));
    }
}
