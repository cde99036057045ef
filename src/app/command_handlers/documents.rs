use crate::app::command_support::{open_context, parse_flags, read_file};
use crate::context::Context;
use crate::models::{
    Credential, Inventory, Job, JobTemplate, Organization, Project, Team, TerraformJobTemplate,
    User,
};
use crate::rbac::{validate_access_list, Protected};
use crate::store::{Collection, Document, DocumentStoreExt};
use serde_json::Value;
use std::path::Path;

const PUT_USAGE: &str = "tensord put <collection> <json file>";
const GET_USAGE: &str = "tensord get <collection> <id>";
const ENCRYPT_USAGE: &str = "tensord encrypt <plaintext>";

pub fn cmd_put(root: &Path, args: &[String]) -> Result<String, String> {
    let parsed = parse_flags(args, &[], &[])?;
    let collection = Collection::parse(parsed.positional(0, PUT_USAGE)?)?;
    let path = parsed.positional(1, PUT_USAGE)?;
    let body: Value = serde_json::from_str(&read_file(path)?)
        .map_err(|e| format!("invalid json in {path}: {e}"))?;

    let ctx = open_context(root)?;
    let (id, created) = put_document(&ctx, collection, body)?;
    ctx.log_runtime(
        "info",
        "document.stored",
        &[
            ("collection", Value::from(collection.as_str())),
            ("id", Value::from(id.as_str())),
            ("created", Value::from(created)),
        ],
    );
    Ok(format!(
        "stored\ncollection={collection}\nid={id}\ncreated={created}"
    ))
}

pub fn cmd_get(root: &Path, args: &[String]) -> Result<String, String> {
    let parsed = parse_flags(args, &[], &[])?;
    let collection = Collection::parse(parsed.positional(0, GET_USAGE)?)?;
    let id = parsed.positional(1, GET_USAGE)?;

    let ctx = open_context(root)?;
    let body = if collection == Collection::Credentials {
        let credential: Credential = ctx
            .store
            .load(collection, id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("{collection}/{id} not found"))?;
        serde_json::to_value(credential.redacted()).map_err(|e| e.to_string())?
    } else {
        ctx.store
            .find_by_id(collection, id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("{collection}/{id} not found"))?
    };
    serde_json::to_string_pretty(&body).map_err(|e| e.to_string())
}

pub fn cmd_encrypt(root: &Path, args: &[String]) -> Result<String, String> {
    let [plaintext] = args else {
        return Err(format!("usage: {ENCRYPT_USAGE}"));
    };
    let ctx = open_context(root)?;
    ctx.cipher.encrypt(plaintext).map_err(|e| e.to_string())
}

/// Validates `body` against the collection's model and writes it. Returns
/// the id and whether the document is new.
pub fn put_document(
    ctx: &Context,
    collection: Collection,
    body: Value,
) -> Result<(String, bool), String> {
    match collection {
        Collection::Credentials => {
            let mut credential: Credential = decode(collection, body)?;
            let previous: Option<Credential> = ctx
                .store
                .load(collection, credential.id.as_str())
                .map_err(|e| e.to_string())?;
            credential
                .seal_secrets(&ctx.cipher, previous.as_ref())
                .map_err(|e| e.to_string())?;
            write_protected(ctx, collection, &credential)
        }
        Collection::Organizations => {
            write_protected(ctx, collection, &decode::<Organization>(collection, body)?)
        }
        Collection::Projects => {
            write_protected(ctx, collection, &decode::<Project>(collection, body)?)
        }
        Collection::Inventories => {
            write_protected(ctx, collection, &decode::<Inventory>(collection, body)?)
        }
        Collection::JobTemplates => {
            write_protected(ctx, collection, &decode::<JobTemplate>(collection, body)?)
        }
        Collection::TerraformJobTemplates => write_protected(
            ctx,
            collection,
            &decode::<TerraformJobTemplate>(collection, body)?,
        ),
        Collection::Jobs | Collection::TerraformJobs => {
            write_typed(ctx, collection, &decode::<Job>(collection, body)?)
        }
        Collection::Teams => {
            write_protected(ctx, collection, &decode::<Team>(collection, body)?)
        }
        Collection::Users => {
            write_typed(ctx, collection, &decode::<User>(collection, body)?)
        }
        Collection::Groups | Collection::Hosts | Collection::ActivityStream => {
            write_raw(ctx, collection, body)
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    collection: Collection,
    body: Value,
) -> Result<T, String> {
    serde_json::from_value(body).map_err(|e| format!("invalid {collection} document: {e}"))
}

fn write_protected<T: Document + Protected>(
    ctx: &Context,
    collection: Collection,
    document: &T,
) -> Result<(String, bool), String> {
    validate_access_list(document.resource_kind(), document.access_list())
        .map_err(|e| format!("{collection}/{}: {e}", document.document_id()))?;
    write_typed(ctx, collection, document)
}

fn write_typed<T: Document>(
    ctx: &Context,
    collection: Collection,
    document: &T,
) -> Result<(String, bool), String> {
    if document.collection() != collection {
        return Err(format!(
            "document belongs in {}, not {collection}",
            document.collection()
        ));
    }
    let id = document.document_id().to_string();
    let exists = ctx
        .store
        .find_by_id(collection, &id)
        .map_err(|e| e.to_string())?
        .is_some();
    if exists {
        ctx.store.replace_document(document)
    } else {
        ctx.store.insert_document(document)
    }
    .map_err(|e| e.to_string())?;
    Ok((id, !exists))
}

fn write_raw(ctx: &Context, collection: Collection, body: Value) -> Result<(String, bool), String> {
    let id = body
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| format!("{collection} document needs a string `id`"))?
        .to_string();
    let exists = ctx
        .store
        .find_by_id(collection, &id)
        .map_err(|e| e.to_string())?
        .is_some();
    if exists {
        ctx.store.replace(collection, &id, &body)
    } else {
        ctx.store.insert(collection, &id, &body)
    }
    .map_err(|e| e.to_string())?;
    Ok((id, !exists))
}
