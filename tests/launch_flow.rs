use serde_json::{json, Value};
use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tensor::app::command_handlers::documents::put_document;
use tensor::context::Context;
use tensor::launch::{
    job_template_launch_info, launch_job_template, LaunchError, LaunchErrorKind, LaunchOverrides,
};
use tensor::models::{Job, JobKind, JobStatus, LaunchType};
use tensor::queue::{claim_oldest, Topic};
use tensor::runtime::sweep_stale_jobs;
use tensor::shared::ids::{CredentialId, TemplateId, UserId};
use tensor::store::{Collection, DocumentStoreExt, Filter};

fn open_context() -> (TempDir, Context) {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().join("state");
    let projects = dir.path().join("projects");
    fs::create_dir_all(&root).expect("state root");
    fs::create_dir_all(&projects).expect("projects home");
    fs::write(
        root.join("config.yaml"),
        format!(
            "projects_home: {}\nsecret_key: launch-test-key\n",
            projects.display()
        ),
    )
    .expect("write config");
    let ctx = Context::open(&root).expect("open context");
    (dir, ctx)
}

fn put(ctx: &Context, collection: Collection, body: Value) {
    put_document(ctx, collection, body).expect("store fixture");
}

/// Superuser `admin`, operator `u2` with narrow grants, a manual project
/// and a git project, an inventory and two machine credentials.
fn seed(ctx: &Context) {
    put(ctx, Collection::Users, json!({"id": "admin", "username": "admin", "is_superuser": true}));
    put(ctx, Collection::Users, json!({"id": "u2", "username": "operator"}));
    put(
        ctx,
        Collection::Projects,
        json!({
            "id": "p-manual",
            "name": "playbooks",
            "organization_id": null,
            "roles": [{"grantee_id": "u2", "type": "user", "role": "use"}]
        }),
    );
    put(
        ctx,
        Collection::Projects,
        json!({
            "id": "p-git",
            "name": "site",
            "scm_type": "git",
            "scm_url": "https://git.example.com/ops/site.git",
            "organization_id": null
        }),
    );
    put(
        ctx,
        Collection::Inventories,
        json!({
            "id": "inv1",
            "name": "prod",
            "organization_id": null,
            "roles": [{"grantee_id": "u2", "type": "user", "role": "use"}]
        }),
    );
    put(
        ctx,
        Collection::Credentials,
        json!({
            "id": "c-ops",
            "name": "ops",
            "kind": "ssh",
            "username": "deploy",
            "password": "s3cret",
            "organization_id": null,
            "roles": [{"grantee_id": "u2", "type": "user", "role": "use"}]
        }),
    );
    put(
        ctx,
        Collection::Credentials,
        json!({
            "id": "c-private",
            "name": "someone else's",
            "kind": "ssh",
            "organization_id": null
        }),
    );
}

fn template(id: &str, project: &str, extra: Value) -> Value {
    let mut body = json!({
        "id": id,
        "name": format!("deploy {id}"),
        "project_id": project,
        "inventory_id": "inv1",
        "playbook": "site.yml",
        "machine_credential_id": "c-ops",
        "organization_id": null,
        "roles": [{"grantee_id": "u2", "type": "user", "role": "execute"}]
    });
    if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
        for (key, value) in extra {
            body.insert(key.clone(), value.clone());
        }
    }
    body
}

fn template_id(raw: &str) -> TemplateId {
    TemplateId::parse(raw).expect("template id")
}

fn user(raw: &str) -> UserId {
    UserId::parse(raw).expect("user id")
}

fn all_jobs(ctx: &Context) -> Vec<Job> {
    ctx.store
        .load_all(Collection::Jobs, &Filter::new())
        .expect("load jobs")
}

fn incoming_units(ctx: &Context, topic: Topic) -> usize {
    fs::read_dir(ctx.paths.queue(topic).incoming)
        .expect("incoming dir")
        .count()
}

#[test]
fn manual_project_launch_persists_and_queues_one_unit() {
    let (_dir, ctx) = open_context();
    seed(&ctx);
    put(&ctx, Collection::JobTemplates, template("t1", "p-manual", json!({})));

    let outcome = launch_job_template(
        &ctx,
        &template_id("t1"),
        &user("u2"),
        &LaunchOverrides::default(),
    )
    .expect("launch");

    assert!(outcome.sync_job.is_none());
    assert_eq!(outcome.job.status, JobStatus::New);
    assert_eq!(outcome.job.kind, JobKind::Ansible);
    assert_eq!(outcome.job.created_by.as_ref().map(UserId::as_str), Some("u2"));
    let stored = all_jobs(&ctx);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, outcome.job.id);
    assert_eq!(incoming_units(&ctx, Topic::Ansible), 1);
    assert_eq!(incoming_units(&ctx, Topic::Terraform), 0);
}

#[test]
fn stale_scm_checkout_inserts_a_project_update_ahead_of_the_job() {
    let (_dir, ctx) = open_context();
    seed(&ctx);
    put(&ctx, Collection::JobTemplates, template("t-git", "p-git", json!({})));

    let outcome = launch_job_template(
        &ctx,
        &template_id("t-git"),
        &user("admin"),
        &LaunchOverrides::default(),
    )
    .expect("launch");

    let sync = outcome.sync_job.expect("project update inserted");
    assert_eq!(sync.kind, JobKind::Sync);
    assert_eq!(sync.launch_type, LaunchType::Dependency);
    assert_eq!(sync.project_id.as_str(), "p-git");
    assert_eq!(outcome.job.previous_job_id.as_ref(), Some(&sync.id));

    let stored: Job = ctx
        .store
        .load(Collection::Jobs, outcome.job.id.as_str())
        .expect("load")
        .expect("job stored");
    assert_eq!(stored.previous_job_id, Some(sync.id.clone()));
    assert_eq!(all_jobs(&ctx).len(), 2);
    assert_eq!(incoming_units(&ctx, Topic::Ansible), 2);
}

#[test]
fn prompted_credential_must_be_supplied() {
    let (_dir, ctx) = open_context();
    seed(&ctx);
    put(
        &ctx,
        Collection::JobTemplates,
        template("t-prompt", "p-manual", json!({"prompt_credential": true})),
    );

    let err = launch_job_template(
        &ctx,
        &template_id("t-prompt"),
        &user("u2"),
        &LaunchOverrides::default(),
    )
    .expect_err("credential is prompted");
    assert!(matches!(
        err,
        LaunchError::MissingPromptField {
            field: "machine_credential_id"
        }
    ));
    assert!(all_jobs(&ctx).is_empty());
    assert_eq!(incoming_units(&ctx, Topic::Ansible), 0);
}

#[test]
fn unreadable_override_credential_reports_not_found() {
    let (_dir, ctx) = open_context();
    seed(&ctx);
    put(
        &ctx,
        Collection::JobTemplates,
        template("t-prompt", "p-manual", json!({"prompt_credential": true})),
    );

    let overrides = LaunchOverrides {
        machine_credential_id: Some(CredentialId::parse("c-private").expect("credential id")),
        ..LaunchOverrides::default()
    };
    let err = launch_job_template(&ctx, &template_id("t-prompt"), &user("u2"), &overrides)
        .expect_err("credential is not readable by u2");
    assert!(matches!(err, LaunchError::CredentialNotFound { .. }));
    assert_eq!(err.kind(), LaunchErrorKind::Validation);

    let overrides = LaunchOverrides {
        machine_credential_id: Some(CredentialId::parse("c-ops").expect("credential id")),
        ..LaunchOverrides::default()
    };
    launch_job_template(&ctx, &template_id("t-prompt"), &user("u2"), &overrides)
        .expect("readable override launches");
}

#[test]
fn unreadable_template_and_missing_template_look_the_same() {
    let (_dir, ctx) = open_context();
    seed(&ctx);
    let mut hidden = template("t-hidden", "p-manual", json!({}));
    hidden["roles"] = json!([]);
    put(&ctx, Collection::JobTemplates, hidden);

    for id in ["t-hidden", "t-absent"] {
        let err = launch_job_template(
            &ctx,
            &template_id(id),
            &user("u2"),
            &LaunchOverrides::default(),
        )
        .expect_err("not visible");
        assert_eq!(err.to_string(), format!("template {id} not found"));
    }
    let log = fs::read_to_string(ctx.paths.security_log_path()).expect("security log");
    assert!(log.contains("access.denied"));
}

#[test]
fn template_without_simultaneous_runs_rejects_a_second_launch() {
    let (_dir, ctx) = open_context();
    seed(&ctx);
    put(
        &ctx,
        Collection::JobTemplates,
        template("t-single", "p-manual", json!({"allow_simultaneous": false})),
    );

    let first = launch_job_template(
        &ctx,
        &template_id("t-single"),
        &user("admin"),
        &LaunchOverrides::default(),
    )
    .expect("first launch");
    let err = launch_job_template(
        &ctx,
        &template_id("t-single"),
        &user("admin"),
        &LaunchOverrides::default(),
    )
    .expect_err("busy");
    match err {
        LaunchError::TemplateBusy { active_job_id, .. } => {
            assert_eq!(active_job_id, first.job.id.as_str())
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn launch_info_reports_what_the_caller_must_supply() {
    let (_dir, ctx) = open_context();
    seed(&ctx);
    put(
        &ctx,
        Collection::JobTemplates,
        template(
            "t-info",
            "p-manual",
            json!({"prompt_limit": true, "machine_credential_id": null}),
        ),
    );

    let info = job_template_launch_info(&ctx, &template_id("t-info"), &user("u2"))
        .expect("launch info");
    assert!(info.ask_limit_on_launch);
    assert!(info.credential_needed_to_start);
    assert!(!info.inventory_needed_to_start);
    assert!(!info.can_start_without_user_input);
}

#[test]
fn credentials_are_sealed_at_rest() {
    let (_dir, ctx) = open_context();
    seed(&ctx);
    let raw = ctx
        .store
        .find_by_id(Collection::Credentials, "c-ops")
        .expect("find")
        .expect("stored");
    let password = raw["password"].as_str().expect("password");
    assert_ne!(password, "s3cret");
    assert_eq!(ctx.cipher.decrypt(password).expect("decrypt"), "s3cret");
}

#[test]
fn credential_of_the_wrong_kind_is_rejected_without_a_job() {
    let (_dir, ctx) = open_context();
    seed(&ctx);
    put(
        &ctx,
        Collection::Credentials,
        json!({"id": "c-net", "name": "switches", "kind": "net", "organization_id": null}),
    );
    put(
        &ctx,
        Collection::Credentials,
        json!({"id": "c-aws", "name": "cloud", "kind": "aws", "organization_id": null}),
    );
    put(
        &ctx,
        Collection::JobTemplates,
        template("t-net-machine", "p-manual", json!({"machine_credential_id": "c-net"})),
    );
    put(
        &ctx,
        Collection::JobTemplates,
        template("t-aws-network", "p-manual", json!({"network_credential_id": "c-aws"})),
    );

    let err = launch_job_template(
        &ctx,
        &template_id("t-net-machine"),
        &user("admin"),
        &LaunchOverrides::default(),
    )
    .expect_err("net is not a machine credential");
    assert_eq!(err.kind(), LaunchErrorKind::Validation);
    match err {
        LaunchError::IncompatibleCredential { role, id, kind } => {
            assert_eq!((role, id.as_str(), kind.as_str()), ("machine", "c-net", "net"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = launch_job_template(
        &ctx,
        &template_id("t-aws-network"),
        &user("admin"),
        &LaunchOverrides::default(),
    )
    .expect_err("aws is not a network credential");
    assert!(matches!(
        err,
        LaunchError::IncompatibleCredential { role: "network", .. }
    ));

    assert!(all_jobs(&ctx).is_empty());
    assert_eq!(incoming_units(&ctx, Topic::Ansible), 0);
}

#[test]
fn concurrent_launches_of_an_exclusive_template_admit_one_job() {
    let (_dir, ctx) = open_context();
    seed(&ctx);
    put(
        &ctx,
        Collection::JobTemplates,
        template("t-race", "p-manual", json!({"allow_simultaneous": false})),
    );

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ctx = ctx.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                launch_job_template(
                    &ctx,
                    &template_id("t-race"),
                    &user("admin"),
                    &LaunchOverrides::default(),
                )
            })
        })
        .collect();

    let mut launched = 0;
    for handle in handles {
        match handle.join().expect("join") {
            Ok(_) => launched += 1,
            Err(LaunchError::TemplateBusy { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(launched, 1);
    assert_eq!(all_jobs(&ctx).len(), 1);
    assert_eq!(incoming_units(&ctx, Topic::Ansible), 1);
}

#[test]
fn applied_sweep_leaves_a_queued_job_alone() {
    let (_dir, ctx) = open_context();
    seed(&ctx);
    put(&ctx, Collection::JobTemplates, template("t1", "p-manual", json!({})));
    let outcome = launch_job_template(
        &ctx,
        &template_id("t1"),
        &user("admin"),
        &LaunchOverrides::default(),
    )
    .expect("launch");

    let report = sweep_stale_jobs(
        &ctx,
        Duration::from_secs(900),
        true,
        outcome.job.created + 1200,
    )
    .expect("sweep");
    assert!(report.stale.is_empty());
    assert!(report.failed.is_empty());
    assert_eq!(report.queued, [outcome.job.id.clone()]);

    let stored: Job = ctx
        .store
        .load(Collection::Jobs, outcome.job.id.as_str())
        .expect("load")
        .expect("present");
    assert_eq!(stored.status, JobStatus::New);
    let claimed = claim_oldest(&ctx.paths.queue(Topic::Ansible))
        .expect("claim")
        .expect("unit still queued");
    assert_eq!(claimed.unit.job().id, outcome.job.id);
}
