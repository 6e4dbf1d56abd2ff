/*!
 * @file commands.rs
 * @brief Command Layer: one function per MongoDB command, Document in/out
 */

use bson::{doc, Bson, Document};

use crate::connection::Connection;
use crate::error::{CommandError, Error, Result, WriteError};
use crate::namespace::{Collection, Database, Namespace};

#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub limit: Option<i64>,
    pub skip: Option<i64>,
    pub sort: Option<Document>,
    pub projection: Option<Document>,
    pub batch_size: Option<i32>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpdateStatement {
    pub query: Document,
    pub update: Document,
    pub upsert: Option<bool>,
    pub multi: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct DeleteStatement {
    pub query: Document,
    pub limit: i32,
}

#[derive(Debug, Clone, Default)]
pub struct InsertOutcome {
    pub n: i64,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateOutcome {
    pub n: i64,
    pub n_modified: i64,
    pub upserted: Vec<Document>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOutcome {
    pub n: i64,
}

/// Success is `ok == 1` (accepting both `1` and `1.0`); otherwise builds
/// a `CommandError` from `code`/`codeName`/`errmsg`.
fn interpret_reply(reply: Document) -> Result<Document> {
    let ok = reply
        .get_f64("ok")
        .or_else(|_| reply.get_i32("ok").map(|v| v as f64))
        .unwrap_or(0.0);

    if ok == 1.0 {
        return Ok(reply);
    }

    let code = reply.get_i32("code").unwrap_or(0);
    let code_name = reply.get_str("codeName").ok().map(|s| s.to_string());
    let message = reply
        .get_str("errmsg")
        .map(|s| s.to_string())
        .unwrap_or_else(|_| "command failed".to_string());

    Err(Error::Command(CommandError {
        code,
        code_name,
        message,
    }))
}

/// A non-empty `writeErrors` or `writeConcernError` fails the deferred
/// even when `ok == 1`.
fn check_write_errors(reply: &Document) -> Result<()> {
    if let Ok(write_errors) = reply.get_array("writeErrors") {
        if let Some(first) = write_errors.first().and_then(Bson::as_document) {
            return Err(Error::Write(WriteError {
                index: first.get_i64("index").or_else(|_| first.get_i32("index").map(i64::from)).unwrap_or(0),
                code: first.get_i32("code").unwrap_or(0),
                message: first
                    .get_str("errmsg")
                    .map(|s| s.to_string())
                    .unwrap_or_default(),
            }));
        }
    }

    if let Ok(concern_error) = reply.get_document("writeConcernError") {
        return Err(Error::Write(WriteError {
            index: -1,
            code: concern_error.get_i32("code").unwrap_or(0),
            message: concern_error
                .get_str("errmsg")
                .map(|s| s.to_string())
                .unwrap_or_default(),
        }));
    }

    Ok(())
}

async fn run(connection: &Connection, db: &str, command: Document) -> Result<Document> {
    let reply = connection.run_command(db, command).await?;
    interpret_reply(reply)
}

pub async fn find(collection: &Collection, filter: Document, options: FindOptions) -> Result<Document> {
    let mut command = doc! {
        "find": collection.name(),
        "filter": filter,
    };
    if let Some(limit) = options.limit {
        command.insert("limit", limit);
    }
    if let Some(skip) = options.skip {
        command.insert("skip", skip);
    }
    if let Some(sort) = options.sort {
        command.insert("sort", sort);
    }
    if let Some(projection) = options.projection {
        command.insert("projection", projection);
    }
    if let Some(batch_size) = options.batch_size {
        command.insert("batchSize", batch_size);
    }
    if let Some(comment) = options.comment {
        command.insert("comment", comment);
    }

    run(collection.connection(), collection.database().name(), command).await
}

pub async fn get_more(
    connection: &Connection,
    namespace: &Namespace,
    cursor_id: i64,
    batch_size: Option<i32>,
) -> Result<Document> {
    let mut command = doc! {
        "getMore": cursor_id,
        "collection": &namespace.collection,
    };
    if let Some(batch_size) = batch_size {
        command.insert("batchSize", batch_size);
    }
    run(connection, &namespace.database, command).await
}

pub(crate) fn kill_cursors_document(collection: &str, cursor_id: i64) -> Document {
    doc! {
        "killCursors": collection,
        "cursors": [cursor_id],
    }
}

/// Fire-and-forget: failures are logged by the caller, never surfaced
/// to the original cursor owner.
pub async fn kill_cursors(connection: &Connection, namespace: &Namespace, cursor_ids: &[i64]) -> Result<()> {
    let command = doc! {
        "killCursors": &namespace.collection,
        "cursors": cursor_ids.iter().map(|&id| Bson::Int64(id)).collect::<Vec<_>>(),
    };
    run(connection, &namespace.database, command).await?;
    Ok(())
}

pub async fn count(collection: &Collection, query: Option<Document>) -> Result<i64> {
    let mut command = doc! { "count": collection.name() };
    if let Some(query) = query {
        command.insert("query", query);
    }
    let reply = run(collection.connection(), collection.database().name(), command).await?;
    reply
        .get_i64("n")
        .or_else(|_| reply.get_i32("n").map(i64::from))
        .map_err(|_| Error::Protocol("count reply missing n".to_string()))
}

pub async fn distinct(collection: &Collection, key: &str, query: Option<Document>) -> Result<Vec<Bson>> {
    let mut command = doc! { "distinct": collection.name(), "key": key };
    if let Some(query) = query {
        command.insert("query", query);
    }
    let reply = run(collection.connection(), collection.database().name(), command).await?;
    Ok(reply.get_array("values").map(|v| v.clone()).unwrap_or_default())
}

pub async fn aggregate(collection: &Collection, pipeline: Vec<Document>, batch_size: Option<i32>) -> Result<Document> {
    let mut cursor_doc = Document::new();
    if let Some(batch_size) = batch_size {
        cursor_doc.insert("batchSize", batch_size);
    }
    let command = doc! {
        "aggregate": collection.name(),
        "pipeline": pipeline,
        "cursor": cursor_doc,
    };
    run(collection.connection(), collection.database().name(), command).await
}

pub async fn insert(collection: &Collection, documents: Vec<Document>, ordered: Option<bool>) -> Result<InsertOutcome> {
    if documents.is_empty() {
        return Err(Error::InvalidArgument("NothingToDo".to_string()));
    }

    let mut command = doc! {
        "insert": collection.name(),
        "documents": documents,
    };
    if let Some(ordered) = ordered {
        command.insert("ordered", ordered);
    }

    let reply = run(collection.connection(), collection.database().name(), command).await?;
    check_write_errors(&reply)?;

    Ok(InsertOutcome {
        n: reply.get_i32("n").unwrap_or(0) as i64,
    })
}

pub async fn update(collection: &Collection, updates: Vec<UpdateStatement>, ordered: Option<bool>) -> Result<UpdateOutcome> {
    if updates.is_empty() || updates.iter().any(|u| u.update.is_empty()) {
        return Err(Error::InvalidArgument("NothingToDo".to_string()));
    }

    let update_docs: Vec<Document> = updates
        .into_iter()
        .map(|u| {
            let mut d = doc! { "q": u.query, "u": u.update };
            if let Some(upsert) = u.upsert {
                d.insert("upsert", upsert);
            }
            if let Some(multi) = u.multi {
                d.insert("multi", multi);
            }
            d
        })
        .collect();

    let mut command = doc! {
        "update": collection.name(),
        "updates": update_docs,
    };
    if let Some(ordered) = ordered {
        command.insert("ordered", ordered);
    }

    let reply = run(collection.connection(), collection.database().name(), command).await?;
    check_write_errors(&reply)?;

    Ok(UpdateOutcome {
        n: reply.get_i32("n").unwrap_or(0) as i64,
        n_modified: reply.get_i32("nModified").unwrap_or(0) as i64,
        upserted: reply
            .get_array("upserted")
            .map(|arr| arr.iter().filter_map(Bson::as_document).cloned().collect())
            .unwrap_or_default(),
    })
}

pub async fn delete(collection: &Collection, deletes: Vec<DeleteStatement>, ordered: Option<bool>) -> Result<DeleteOutcome> {
    if deletes.is_empty() {
        return Err(Error::InvalidArgument("NothingToDo".to_string()));
    }

    let delete_docs: Vec<Document> = deletes
        .into_iter()
        .map(|d| doc! { "q": d.query, "limit": d.limit })
        .collect();

    let mut command = doc! {
        "delete": collection.name(),
        "deletes": delete_docs,
    };
    if let Some(ordered) = ordered {
        command.insert("ordered", ordered);
    }

    let reply = run(collection.connection(), collection.database().name(), command).await?;
    check_write_errors(&reply)?;

    Ok(DeleteOutcome {
        n: reply.get_i32("n").unwrap_or(0) as i64,
    })
}

pub async fn list_collections(database: &Database) -> Result<Document> {
    run(&database.connection, database.name(), doc! { "listCollections": 1 }).await
}

pub async fn create_user(database: &Database, username: &str, password: &str, roles: Vec<Document>) -> Result<Document> {
    run(
        &database.connection,
        database.name(),
        doc! {
            "createUser": username,
            "pwd": password,
            "roles": roles,
        },
    )
    .await
}

pub async fn users_info(database: &Database, username: &str) -> Result<Document> {
    run(&database.connection, database.name(), doc! { "usersInfo": username }).await
}

/// Post-handshake diagnostic wrapper, distinct from the internal
/// handshake the connection runs once at `dial()` time.
pub async fn is_master(database: &Database) -> Result<Document> {
    run(&database.connection, database.name(), doc! { "isMaster": 1 }).await
}

impl Collection {
    pub async fn count(&self, query: Option<Document>) -> Result<i64> {
        count(self, query).await
    }

    pub async fn distinct(&self, key: &str, query: Option<Document>) -> Result<Vec<Bson>> {
        distinct(self, key, query).await
    }

    pub async fn insert(&self, documents: Vec<Document>, ordered: Option<bool>) -> Result<InsertOutcome> {
        insert(self, documents, ordered).await
    }

    pub async fn update(&self, updates: Vec<UpdateStatement>, ordered: Option<bool>) -> Result<UpdateOutcome> {
        update(self, updates, ordered).await
    }

    pub async fn delete(&self, deletes: Vec<DeleteStatement>, ordered: Option<bool>) -> Result<DeleteOutcome> {
        delete(self, deletes, ordered).await
    }

    pub async fn run_command(&self, command: Document) -> Result<Document> {
        run(self.connection(), self.database().name(), command).await
    }
}

impl Database {
    pub async fn create_user(&self, username: &str, password: &str, roles: Vec<Document>) -> Result<Document> {
        create_user(self, username, password, roles).await
    }

    pub async fn users_info(&self, username: &str) -> Result<Document> {
        users_info(self, username).await
    }

    pub async fn is_master(&self) -> Result<Document> {
        is_master(self).await
    }

    /// Escape hatch for commands the typed layer doesn't wrap.
    pub async fn run_command(&self, command: Document) -> Result<Document> {
        run(&self.connection, self.name(), command).await
    }
}
