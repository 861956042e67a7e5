//! File-backed repository of topics and tasks.
//!
//! Layout under the materials root:
//!
//! ```text
//! index.json                        ordered topic index, sole source of truth
//! <topic>/description/task_N.json   description lines
//! <topic>/input/task_N.txt          input fixture, newline-delimited values
//! <topic>/output/task_N.txt         expected output, newline-delimited values
//! <topic>/code/task_N.txt           reference solution blob
//! ```
//!
//! Task creation and deletion recount the live per-task files and rewrite the
//! whole index; mutations hold a store-wide lock so concurrent read-modify-
//! write cycles cannot lose counts.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

const INDEX_FILE: &str = "index.json";

/// A named grouping of tasks with a storage path and task count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Topic {
    pub id: usize,
    pub name: String,
    pub path: String,
    pub count: usize,
}

/// One gradable exercise as read back from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub description: Vec<String>,
    pub input: Vec<String>,
    pub expected_output: Vec<String>,
    pub code: String,
}

/// Write-side payload for [`TaskStore::write_task`].
#[derive(Debug, Clone, Default)]
pub struct TaskContent {
    pub description: Vec<String>,
    pub input: Vec<String>,
    pub expected_output: Vec<String>,
    pub code: String,
}

pub struct TaskStore {
    root: PathBuf,
    index_lock: Mutex<()>,
}

impl TaskStore {
    /// Opens the store at `root`, creating the root and an empty index on
    /// first use.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let index_path = root.join(INDEX_FILE);
        if !index_path.exists() {
            fs::write(&index_path, "[]")?;
        }

        Ok(Self {
            root,
            index_lock: Mutex::new(()),
        })
    }

    /// Ordered list of all topics.
    pub fn index(&self) -> Result<Vec<Topic>, StoreError> {
        let raw = fs::read_to_string(self.root.join(INDEX_FILE))?;
        serde_json::from_str(&raw).map_err(|e| StoreError::MalformedIndex(e.to_string()))
    }

    /// Topic lookup; the id doubles as the position in the index.
    pub fn topic(&self, topic_id: usize) -> Result<Topic, StoreError> {
        self.index()?
            .into_iter()
            .nth(topic_id)
            .ok_or(StoreError::NotFoundTopic)
    }

    /// Registers a new topic, creating its fixture directories.
    pub fn create_topic(&self, name: &str) -> Result<Topic, StoreError> {
        let _guard = self.index_lock.lock();

        let mut topics = self.index()?;
        let topic = Topic {
            id: topics.len(),
            name: name.to_string(),
            path: sanitize_path_component(name),
            count: 0,
        };

        let dir = self.root.join(&topic.path);
        for sub in ["description", "input", "output", "code"] {
            fs::create_dir_all(dir.join(sub))?;
        }

        topics.push(topic.clone());
        self.rewrite_index(&topics)?;
        log::info!("Topic {} ({}) created", topic.id, topic.name);

        Ok(topic)
    }

    pub fn read_task(&self, topic_id: usize, task_id: usize) -> Result<Task, StoreError> {
        let topic = self.topic(topic_id)?;
        let dir = self.root.join(&topic.path);

        let description_raw = read_task_file(&task_file(&dir, "description", task_id, "json"))?;
        let description: Vec<String> = serde_json::from_str(&description_raw)
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?;

        Ok(Task {
            description,
            input: read_lines(&task_file(&dir, "input", task_id, "txt"))?,
            expected_output: read_lines(&task_file(&dir, "output", task_id, "txt"))?,
            code: read_task_file(&task_file(&dir, "code", task_id, "txt"))?,
        })
    }

    /// Host path of the task's input fixture, for injection into a sandbox.
    pub fn input_fixture_path(
        &self,
        topic_id: usize,
        task_id: usize,
    ) -> Result<PathBuf, StoreError> {
        let topic = self.topic(topic_id)?;
        let path = task_file(&self.root.join(&topic.path), "input", task_id, "txt");
        if !path.exists() {
            return Err(StoreError::NotFoundTask);
        }
        Ok(path)
    }

    /// Writes or replaces a task's four files and refreshes the topic count.
    pub fn write_task(
        &self,
        topic_id: usize,
        task_id: usize,
        content: &TaskContent,
    ) -> Result<(), StoreError> {
        let _guard = self.index_lock.lock();

        let topic = self.topic(topic_id)?;
        let dir = self.root.join(&topic.path);
        for sub in ["description", "input", "output", "code"] {
            fs::create_dir_all(dir.join(sub))?;
        }

        let description = serde_json::to_string(&content.description)
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?;
        fs::write(task_file(&dir, "description", task_id, "json"), description)?;
        write_lines(&task_file(&dir, "input", task_id, "txt"), &content.input)?;
        write_lines(&task_file(&dir, "output", task_id, "txt"), &content.expected_output)?;
        fs::write(task_file(&dir, "code", task_id, "txt"), &content.code)?;

        self.refresh_count(topic_id)
    }

    /// Removes a task's files and refreshes the topic count.
    pub fn delete_task(&self, topic_id: usize, task_id: usize) -> Result<(), StoreError> {
        let _guard = self.index_lock.lock();

        let topic = self.topic(topic_id)?;
        let dir = self.root.join(&topic.path);

        let description = task_file(&dir, "description", task_id, "json");
        if !description.exists() {
            return Err(StoreError::NotFoundTask);
        }
        fs::remove_file(description)?;

        // Sibling files may already be gone; the description file is the
        // marker of task existence.
        for (sub, ext) in [("input", "txt"), ("output", "txt"), ("code", "txt")] {
            let path = task_file(&dir, sub, task_id, ext);
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(e.into());
                }
            }
        }

        self.refresh_count(topic_id)
    }

    /// Recounts the live task files and rewrites the whole index.
    /// Caller must hold `index_lock`.
    fn refresh_count(&self, topic_id: usize) -> Result<(), StoreError> {
        let mut topics = self.index()?;
        let topic = topics.get_mut(topic_id).ok_or(StoreError::NotFoundTopic)?;

        let description_dir = self.root.join(&topic.path).join("description");
        topic.count = match fs::read_dir(&description_dir) {
            Ok(entries) => entries.filter_map(|e| e.ok()).count(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        self.rewrite_index(&topics)
    }

    fn rewrite_index(&self, topics: &[Topic]) -> Result<(), StoreError> {
        let raw = serde_json::to_string_pretty(topics)
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?;
        fs::write(self.root.join(INDEX_FILE), raw)?;
        Ok(())
    }
}

fn task_file(topic_dir: &Path, sub: &str, task_id: usize, ext: &str) -> PathBuf {
    topic_dir.join(sub).join(format!("task_{task_id}.{ext}"))
}

fn read_task_file(path: &Path) -> Result<String, StoreError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFoundTask),
        Err(e) => Err(e.into()),
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>, StoreError> {
    Ok(read_task_file(path)?.lines().map(str::to_string).collect())
}

fn write_lines(path: &Path, values: &[String]) -> Result<(), StoreError> {
    let mut content = values.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    fs::write(path, content)?;
    Ok(())
}

/// Restricts topic directory names to characters safe for paths and tags.
fn sanitize_path_component(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;

    static TEST_DIR_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn test_root() -> PathBuf {
        let id = TEST_DIR_COUNTER.fetch_add(1, Ordering::SeqCst);
        let root = std::env::temp_dir().join(format!("gradebox-store-test-{id}"));
        let _ = fs::remove_dir_all(&root);
        root
    }

    fn sample_task() -> TaskContent {
        TaskContent {
            description: vec!["Echo the input.".to_string()],
            input: vec!["Hello, World!".to_string()],
            expected_output: vec!["Hello, World!".to_string()],
            code: "print(input())".to_string(),
        }
    }

    #[test]
    fn write_then_read_roundtrip() {
        let root = test_root();
        let store = TaskStore::open(&root).unwrap();
        let topic = store.create_topic("Basics").unwrap();

        store.write_task(topic.id, 0, &sample_task()).unwrap();
        let task = store.read_task(topic.id, 0).unwrap();

        assert_eq!(task.description, vec!["Echo the input.".to_string()]);
        assert_eq!(task.input, vec!["Hello, World!".to_string()]);
        assert_eq!(task.expected_output, vec!["Hello, World!".to_string()]);
        assert_eq!(task.code, "print(input())");

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn mutations_keep_count_in_sync() {
        let root = test_root();
        let store = TaskStore::open(&root).unwrap();
        let topic = store.create_topic("Counting").unwrap();
        assert_eq!(store.topic(topic.id).unwrap().count, 0);

        store.write_task(topic.id, 0, &sample_task()).unwrap();
        store.write_task(topic.id, 1, &sample_task()).unwrap();
        assert_eq!(store.topic(topic.id).unwrap().count, 2);

        store.delete_task(topic.id, 0).unwrap();
        assert_eq!(store.topic(topic.id).unwrap().count, 1);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn missing_topic_and_task_are_distinct() {
        let root = test_root();
        let store = TaskStore::open(&root).unwrap();
        let topic = store.create_topic("Sparse").unwrap();

        assert!(matches!(
            store.read_task(99, 0),
            Err(StoreError::NotFoundTopic)
        ));
        assert!(matches!(
            store.read_task(topic.id, 7),
            Err(StoreError::NotFoundTask)
        ));
        assert!(matches!(
            store.delete_task(topic.id, 7),
            Err(StoreError::NotFoundTask)
        ));

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn topic_paths_are_sanitized() {
        let root = test_root();
        let store = TaskStore::open(&root).unwrap();
        let topic = store.create_topic("Loops / Iteration").unwrap();

        assert_eq!(topic.path, "loops___iteration");
        assert!(root.join(&topic.path).join("input").is_dir());

        fs::remove_dir_all(&root).unwrap();
    }
}
