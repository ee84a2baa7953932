//! Derived note list.
//!
//! Combines the store's live collection with the current search text and sort
//! mode. Any change to one of the three inputs recomputes the whole list and
//! publishes it on a `watch` channel, so readers only ever see the most
//! recent combination and never block.
use std::fmt;

use clap::ValueEnum;
use log::{debug, error, info, trace};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::{Note, NoteStore, NoteFlowError, Result};

/// Ordering applied to the derived list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortType {
    /// Newest timestamp first
    #[default]
    Latest,
    /// Oldest timestamp first
    Oldest,
    /// Title ascending, case-sensitive
    Alphabetical,
}

impl fmt::Display for SortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SortType::Latest => "latest",
            SortType::Oldest => "oldest",
            SortType::Alphabetical => "alphabetical",
        };
        f.write_str(name)
    }
}

/// Whether a note's title or content contains the query, ignoring case
pub fn matches_query(note: &Note, query: &str) -> bool {
    if query.is_empty() {
        return true;
    }
    let needle = query.to_lowercase();
    note.title.to_lowercase().contains(&needle) || note.content.to_lowercase().contains(&needle)
}

/// Filters and sorts a snapshot of the collection.
///
/// Sorting is stable, so notes with equal keys keep the order they had in
/// `all`.
pub fn derive_notes(all: &[Note], query: &str, sort: SortType) -> Vec<Note> {
    let mut derived: Vec<Note> = all
        .iter()
        .filter(|note| matches_query(note, query))
        .cloned()
        .collect();

    match sort {
        SortType::Latest => derived.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
        SortType::Oldest => derived.sort_by(|a, b| a.timestamp.cmp(&b.timestamp)),
        SortType::Alphabetical => derived.sort_by(|a, b| a.title.cmp(&b.title)),
    }

    derived
}

#[derive(Debug, Clone)]
pub enum PipelineCommand {
    /// Stop the pipeline task
    Stop,
}

/// Live, filtered and sorted view over a [`NoteStore`]
pub struct NotePipeline {
    search_tx: watch::Sender<String>,
    sort_tx: watch::Sender<SortType>,
    output: watch::Receiver<Vec<Note>>,
    command_tx: mpsc::Sender<PipelineCommand>,
    task: Option<JoinHandle<()>>,
}

impl NotePipeline {
    /// Starts a pipeline with an empty search and the default sort
    pub fn start(store: &dyn NoteStore) -> Self {
        Self::start_with(store, String::new(), SortType::default())
    }

    /// Starts a pipeline with the given initial inputs.
    ///
    /// The first derived list is computed before returning, so
    /// [`NotePipeline::current`] is immediately meaningful.
    pub fn start_with(store: &dyn NoteStore, query: String, sort: SortType) -> Self {
        let mut notes_rx = store.observe_all();
        let (search_tx, mut search_rx) = watch::channel(query);
        let (sort_tx, mut sort_rx) = watch::channel(sort);

        let initial = derive_notes(
            &notes_rx.borrow_and_update(),
            &search_rx.borrow_and_update(),
            *sort_rx.borrow_and_update(),
        );
        let (output_tx, output) = watch::channel(initial);
        let (command_tx, mut command_rx) = mpsc::channel(4);

        let task = tokio::spawn(async move {
            debug!("Note pipeline task started");
            loop {
                tokio::select! {
                    Ok(()) = notes_rx.changed() => trace!("Note collection changed"),
                    Ok(()) = search_rx.changed() => trace!("Search query changed"),
                    Ok(()) = sort_rx.changed() => trace!("Sort type changed"),
                    cmd = command_rx.recv() => match cmd {
                        Some(PipelineCommand::Stop) | None => break,
                    },
                }

                let derived = {
                    let all = notes_rx.borrow_and_update();
                    let query = search_rx.borrow_and_update();
                    let sort = *sort_rx.borrow_and_update();
                    derive_notes(&all, &query, sort)
                };
                trace!("Publishing {} derived notes", derived.len());
                output_tx.send_replace(derived);
            }
            debug!("Note pipeline task stopped");
        });

        Self {
            search_tx,
            sort_tx,
            output,
            command_tx,
            task: Some(task),
        }
    }

    /// Change the search text
    pub fn set_search_query(&self, query: impl Into<String>) {
        let query = query.into();
        debug!("Search query set to '{}'", query);
        self.search_tx.send_replace(query);
    }

    /// Change the sort mode
    pub fn set_sort_type(&self, sort: SortType) {
        debug!("Sort type set to {}", sort);
        self.sort_tx.send_replace(sort);
    }

    pub fn search_query(&self) -> String {
        self.search_tx.borrow().clone()
    }

    pub fn sort_type(&self) -> SortType {
        *self.sort_tx.borrow()
    }

    /// Receiver of the derived list; every recomputation is published here
    pub fn notes(&self) -> watch::Receiver<Vec<Note>> {
        self.output.clone()
    }

    /// Snapshot of the latest derived list
    pub fn current(&self) -> Vec<Note> {
        self.output.borrow().clone()
    }

    /// Stops the background task and waits for it to finish
    pub async fn stop(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            debug!("Note pipeline is not running");
            return Ok(());
        };

        if let Err(e) = self.command_tx.send(PipelineCommand::Stop).await {
            error!("Failed to send stop command to note pipeline: {}", e);
        }

        task.await.map_err(|e| {
            let error_mgs = format!("Failed to stop note pipeline: {}", e);
            error!("{}", error_mgs);
            NoteFlowError::ApplicationError { message: error_mgs }
        })?;

        info!("Note pipeline stopped");
        Ok(())
    }
}
