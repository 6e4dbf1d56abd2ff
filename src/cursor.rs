/*!
 * @file cursor.rs
 * @brief Cursor Engine: lazy document stream over find/getMore/killCursors
 */

use std::collections::VecDeque;
use std::sync::Arc;

use bson::{Bson, Document};
use futures::stream::{self, Stream};

use crate::commands::{self, FindOptions};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::fauxdb_client_warn;
use crate::namespace::{Collection, Database, Namespace};

/// Lazy document stream over `find`/`aggregate`/`listCollections` plus
/// `getMore`. `cursor_id == 0` is the single source of truth for "no
/// live server-side state" — set both on natural exhaustion and on an
/// explicit `close()`.
pub struct Cursor {
    connection: Arc<Connection>,
    namespace: Namespace,
    cursor_id: i64,
    batch: VecDeque<Document>,
    batch_size: Option<i32>,
    limit: Option<i64>,
    returned: i64,
}

impl Cursor {
    /// Builds a cursor from the `cursor` sub-document of a `find` /
    /// `aggregate` / `listCollections` reply (`{id, ns, firstBatch}`).
    pub(crate) fn from_command_reply(
        connection: Arc<Connection>,
        namespace: Namespace,
        reply: &Document,
        limit: Option<i64>,
        batch_size: Option<i32>,
    ) -> Result<Self> {
        let cursor_doc = reply
            .get_document("cursor")
            .map_err(|_| Error::Protocol("command reply missing cursor sub-document".to_string()))?;
        let cursor_id = cursor_doc.get_i64("id").unwrap_or(0);
        let batch = documents_from(cursor_doc.get_array("firstBatch"));

        Ok(Self {
            connection,
            namespace,
            cursor_id,
            batch,
            batch_size,
            limit,
            returned: 0,
        })
    }

    pub fn cursor_id(&self) -> i64 {
        self.cursor_id
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor_id == 0 && self.batch.is_empty()
    }

    /// Serves from the current batch; issues `getMore` once it's empty
    /// and the server still has state; returns `Ok(None)` at end.
    pub async fn next(&mut self) -> Result<Option<Document>> {
        loop {
            if let Some(doc) = self.batch.pop_front() {
                self.returned += 1;
                if self.limit.map(|limit| self.returned >= limit).unwrap_or(false) {
                    self.close().await?;
                }
                return Ok(Some(doc));
            }

            if self.cursor_id == 0 {
                return Ok(None);
            }

            let reply = commands::get_more(&self.connection, &self.namespace, self.cursor_id, self.batch_size).await?;
            let cursor_doc = reply
                .get_document("cursor")
                .map_err(|_| Error::Protocol("getMore reply missing cursor sub-document".to_string()))?;
            self.cursor_id = cursor_doc.get_i64("id").unwrap_or(0);
            self.batch = documents_from(cursor_doc.get_array("nextBatch"));
        }
    }

    /// Sends `killCursors` if live, then transitions to exhausted.
    /// Idempotent. Failures are logged, never surfaced.
    pub async fn close(&mut self) -> Result<()> {
        if self.cursor_id == 0 {
            return Ok(());
        }
        let id = self.cursor_id;
        self.cursor_id = 0;
        self.batch.clear();
        if let Err(e) = commands::kill_cursors(&self.connection, &self.namespace, &[id]).await {
            fauxdb_client_warn!("killCursors failed for cursor {}: {}", id, e);
        }
        Ok(())
    }

    /// Repeatedly calls `next` until end, collecting into an ordered
    /// sequence.
    pub async fn drain(&mut self) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        while let Some(doc) = self.next().await? {
            documents.push(doc);
        }
        Ok(documents)
    }

    /// Adapts this cursor into a `futures::Stream`, for callers who
    /// prefer combinator-style consumption over manual `next()` calls.
    pub fn into_stream(self) -> impl Stream<Item = Result<Document>> {
        stream::unfold(self, |mut cursor| async move {
            match cursor.next().await {
                Ok(Some(doc)) => Some((Ok(doc), cursor)),
                Ok(None) => None,
                Err(e) => Some((Err(e), cursor)),
            }
        })
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if self.cursor_id != 0 {
            self.connection.schedule_kill(self.namespace.clone(), self.cursor_id);
        }
    }
}

fn documents_from(batch: std::result::Result<&Vec<Bson>, bson::document::ValueAccessError>) -> VecDeque<Document> {
    batch
        .map(|docs| docs.iter().filter_map(Bson::as_document).cloned().collect())
        .unwrap_or_default()
}

/// `findOne` with the limit-1 optimization: no second round trip, since
/// `batchSize: 1` together with `limit: 1` is satisfied by the initial
/// batch alone.
pub async fn find_one(collection: &Collection, filter: Document, mut options: FindOptions) -> Result<Option<Document>> {
    options.limit = Some(1);
    if options.batch_size.is_none() {
        options.batch_size = Some(1);
    }

    let namespace = Namespace::new(collection.database().name(), collection.name());
    let reply = commands::find(collection, filter, options).await?;
    let mut cursor = Cursor::from_command_reply(collection.connection().clone(), namespace, &reply, Some(1), None)?;
    cursor.next().await
}

impl Collection {
    /// Runs `find` and wraps the reply's cursor sub-document.
    pub async fn find(&self, filter: Document, options: FindOptions) -> Result<Cursor> {
        let limit = options.limit;
        let batch_size = options.batch_size;
        let reply = commands::find(self, filter, options).await?;
        let namespace = Namespace::new(self.database().name(), self.name());
        Cursor::from_command_reply(self.connection().clone(), namespace, &reply, limit, batch_size)
    }

    /// `findOne` — limit-1 optimized, no second round trip.
    pub async fn find_one(&self, filter: Document, options: FindOptions) -> Result<Option<Document>> {
        find_one(self, filter, options).await
    }

    pub async fn aggregate(&self, pipeline: Vec<Document>, batch_size: Option<i32>) -> Result<Cursor> {
        let reply = commands::aggregate(self, pipeline, batch_size).await?;
        let namespace = Namespace::new(self.database().name(), self.name());
        Cursor::from_command_reply(self.connection().clone(), namespace, &reply, None, batch_size)
    }
}

impl Database {
    pub async fn list_collections(&self) -> Result<Cursor> {
        let reply = commands::list_collections(self).await?;
        let namespace = Namespace::command(self.name());
        Cursor::from_command_reply(self.connection.clone(), namespace, &reply, None, None)
    }
}
