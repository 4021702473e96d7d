//! Registry and job driver tests, end to end over the demo runner

use std::sync::Arc;
use std::time::Duration;

use deploy_api::{Deployment, DeploymentMode, DeploymentStatus};
use deployd::app::options::AppOptions;
use deployd::app::state::AppState;
use deployd::deploy::credentials::CredentialMaterial;
use deployd::deploy::demo::DemoRunner;
use deployd::models::deployment::{BundleFile, ConfigurationBundle};
use deployd::registry::{DeploymentRegistry, NewDeployment};
use deployd::storage::layout::StorageLayout;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(10);

struct Harness {
    _tmp: TempDir,
    layout: StorageLayout,
    runner: Arc<DemoRunner>,
    registry: Arc<DeploymentRegistry>,
}

fn harness_with(runner: DemoRunner, material: CredentialMaterial) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(tmp.path());
    let options = AppOptions {
        layout: layout.clone(),
        credential_material: material,
        ..Default::default()
    };
    let runner = Arc::new(runner);
    let state = AppState::with_runner(&options, runner.clone());
    Harness {
        _tmp: tmp,
        layout,
        runner,
        registry: state.registry,
    }
}

fn harness(runner: DemoRunner) -> Harness {
    harness_with(runner, CredentialMaterial::default())
}

fn bundle() -> ConfigurationBundle {
    ConfigurationBundle::new(vec![BundleFile::new(
        "main.tf",
        "resource \"azurerm_resource_group\" \"rg\" {}",
    )])
}

async fn finish(registry: &DeploymentRegistry, id: &str) -> Deployment {
    let doc = tokio::time::timeout(WAIT, registry.wait(id))
        .await
        .expect("deployment did not finish in time")
        .expect("unknown deployment");
    assert_invariants(&doc);
    doc
}

fn assert_invariants(doc: &Deployment) {
    assert!(!doc.updates.is_empty());
    assert_eq!(doc.updates[0].status, DeploymentStatus::Initializing);
    assert_eq!(doc.status, doc.updates.last().unwrap().status);
    assert_eq!(doc.finished_at.is_some(), doc.status.is_terminal());

    let terminal: Vec<_> = doc.updates.iter().filter(|u| u.status.is_terminal()).collect();
    if doc.status.is_terminal() {
        assert_eq!(terminal.len(), 1, "exactly one terminal update");
    } else {
        assert!(terminal.is_empty());
    }
}

/// Distinct statuses in the order they were first reached
fn stages(doc: &Deployment) -> Vec<DeploymentStatus> {
    let mut stages: Vec<DeploymentStatus> = Vec::new();
    for update in &doc.updates {
        if stages.last() != Some(&update.status) {
            stages.push(update.status);
        }
    }
    stages
}

fn terraform_subcommands(runner: &DemoRunner) -> Vec<String> {
    runner
        .invocations()
        .into_iter()
        .filter(|i| i.program == "terraform")
        .filter_map(|i| i.subcommand().map(str::to_string))
        .collect()
}

#[tokio::test]
async fn test_single_file_bundle_completes() {
    let h = harness(DemoRunner::new());

    let id = h.registry.create("acme/web", bundle());
    let doc = finish(&h.registry, &id).await;

    assert_eq!(doc.status, DeploymentStatus::Completed);
    assert_eq!(
        stages(&doc),
        vec![
            DeploymentStatus::Initializing,
            DeploymentStatus::Authenticating,
            DeploymentStatus::Preparing,
            DeploymentStatus::Planning,
            DeploymentStatus::Applying,
            DeploymentStatus::Completed,
        ]
    );
    assert_eq!(doc.outputs["resource_group"], "rg-demo");
    assert_eq!(doc.outputs["endpoint"], "https://demo.example.com");
    assert!(doc.error.is_none());
    assert!(doc.aggregated_log.contains("Apply complete!"));

    let working_dir = doc.working_directory.clone().unwrap();
    assert!(working_dir.contains("acme-web-"));
    assert!(working_dir.ends_with(&id));
    assert!(std::path::Path::new(&working_dir).join("main.tf").exists());

    assert_eq!(
        terraform_subcommands(&h.runner),
        vec!["version", "init", "plan", "apply", "output"]
    );
}

#[tokio::test]
async fn test_missing_tool_fails_at_preparing() {
    let h = harness(DemoRunner::new().missing_tool("terraform"));

    let id = h.registry.create("web", bundle());
    let doc = finish(&h.registry, &id).await;

    assert_eq!(doc.status, DeploymentStatus::Failed);
    let stages = stages(&doc);
    assert_eq!(stages[stages.len() - 2], DeploymentStatus::Preparing);
    assert!(!stages.contains(&DeploymentStatus::Planning));
    assert!(doc.updates.last().unwrap().message.contains("terraform"));
    assert!(doc.error.unwrap().contains("terraform"));
}

#[tokio::test]
async fn test_credential_failure_lists_sources() {
    let h = harness(
        DemoRunner::new()
            .fail_on("az", "account", 1, "Please run 'az login' to setup account.")
            .fail_on("az", "login", 1, "ERROR: device code expired"),
    );

    let id = h.registry.create("web", bundle());
    let doc = finish(&h.registry, &id).await;

    assert_eq!(doc.status, DeploymentStatus::Failed);
    assert_eq!(
        stages(&doc),
        vec![
            DeploymentStatus::Initializing,
            DeploymentStatus::Authenticating,
            DeploymentStatus::Failed,
        ]
    );
    let details = doc.updates.last().unwrap().details.clone().unwrap();
    assert!(details.contains("Environment:"));
    assert!(details.contains("Session:"));
    assert!(details.contains("Login:"));
    assert!(terraform_subcommands(&h.runner).is_empty());
}

#[tokio::test]
async fn test_apply_mode_replans_fresh_job() {
    let h = harness(DemoRunner::new());

    let id = h.registry.create_with(NewDeployment {
        subject_name: "web".to_string(),
        reference_id: "ref-7".to_string(),
        mode: DeploymentMode::Apply,
        bundle: bundle(),
    });
    let doc = finish(&h.registry, &id).await;

    assert_eq!(doc.status, DeploymentStatus::Completed);
    assert_eq!(doc.mode, DeploymentMode::Apply);
    assert!(doc.aggregated_log.contains("No valid plan artifact"));

    let planning = doc
        .updates
        .iter()
        .position(|u| u.status == DeploymentStatus::Planning)
        .unwrap();
    let applying = doc
        .updates
        .iter()
        .position(|u| u.status == DeploymentStatus::Applying)
        .unwrap();
    assert!(planning < applying);
    assert_eq!(
        terraform_subcommands(&h.runner),
        vec!["version", "init", "plan", "apply", "output"]
    );
}

#[tokio::test]
async fn test_missing_plan_artifact_is_replanned_before_apply() {
    let h = harness(DemoRunner::new().lose_plan_artifacts(1));

    let id = h.registry.create("web", bundle());
    let doc = finish(&h.registry, &id).await;

    assert_eq!(doc.status, DeploymentStatus::Completed);
    let replan = doc
        .updates
        .iter()
        .find(|u| u.message.contains("re-planning before apply"))
        .unwrap();
    assert_eq!(replan.status, DeploymentStatus::Applying);
    assert_eq!(
        terraform_subcommands(&h.runner),
        vec!["version", "init", "plan", "plan", "apply", "output"]
    );
}

#[tokio::test]
async fn test_tool_failure_keeps_output_as_details() {
    let h = harness(DemoRunner::new().fail_on(
        "terraform",
        "plan",
        1,
        "Error: Invalid resource type\n  on main.tf line 1",
    ));

    let id = h.registry.create("web", bundle());
    let doc = finish(&h.registry, &id).await;

    assert_eq!(doc.status, DeploymentStatus::Failed);
    let last = doc.updates.last().unwrap();
    assert!(last.message.contains("terraform plan"));
    assert!(last.message.contains("exit code 1"));
    assert_eq!(
        last.details.as_deref(),
        Some("Error: Invalid resource type\n  on main.tf line 1")
    );
    assert!(!stages(&doc).contains(&DeploymentStatus::Applying));
}

#[tokio::test]
async fn test_staging_failure_never_plans() {
    let h = harness(DemoRunner::new());
    let bad = ConfigurationBundle::new(vec![
        BundleFile::new("main.tf", "ok"),
        BundleFile::new("../escape.tf", "nope"),
    ]);

    let id = h.registry.create("web", bad);
    let doc = finish(&h.registry, &id).await;

    assert_eq!(doc.status, DeploymentStatus::Failed);
    let stages = stages(&doc);
    assert!(!stages.contains(&DeploymentStatus::Planning));
    assert!(!stages.contains(&DeploymentStatus::Applying));
    assert!(doc.updates.last().unwrap().message.contains("invalid path"));
    assert!(doc.working_directory.is_none());
    assert!(!h
        .layout
        .workspaces_dir()
        .subdir(&format!("web-{}", id))
        .exists()
        .await);
}

#[tokio::test]
async fn test_unparseable_outputs_still_complete() {
    let h = harness(DemoRunner::new().respond("terraform", "output", "Apply complete! no json here"));

    let id = h.registry.create("web", bundle());
    let doc = finish(&h.registry, &id).await;

    assert_eq!(doc.status, DeploymentStatus::Completed);
    assert!(doc.outputs.is_empty());
    assert!(doc.updates.iter().any(|u| u.message.starts_with("Warning:")));

    let json = serde_json::to_value(&doc).unwrap();
    assert_eq!(json["outputs"], serde_json::json!({}));
}

#[tokio::test]
async fn test_failed_output_query_still_completes() {
    let h = harness(DemoRunner::new().fail_on("terraform", "output", 1, "state locked"));

    let id = h.registry.create("web", bundle());
    let doc = finish(&h.registry, &id).await;

    assert_eq!(doc.status, DeploymentStatus::Completed);
    assert!(doc.outputs.is_empty());
}

#[tokio::test]
async fn test_concurrent_jobs_are_isolated() {
    let h = harness(DemoRunner::new());
    let bad = ConfigurationBundle::new(vec![BundleFile::new("/etc/passwd", "x")]);

    let a = h.registry.create("web", bundle());
    let b = h.registry.create("web", bundle());
    let c = h.registry.create("web", bad);
    assert_ne!(a, b);

    let (doc_a, doc_b, doc_c) = tokio::join!(
        finish(&h.registry, &a),
        finish(&h.registry, &b),
        finish(&h.registry, &c)
    );

    assert_eq!(doc_a.status, DeploymentStatus::Completed);
    assert_eq!(doc_b.status, DeploymentStatus::Completed);
    assert_eq!(doc_c.status, DeploymentStatus::Failed);
    assert_ne!(doc_a.working_directory, doc_b.working_directory);
    for doc in [&doc_a, &doc_b] {
        assert!(doc.updates.iter().all(|u| u.status != DeploymentStatus::Failed));
        assert!(!doc.aggregated_log.contains("invalid path"));
    }
}

#[tokio::test]
async fn test_environment_credentials_reach_terraform_only() {
    let material = CredentialMaterial::from_lookup(|name| {
        Some(
            match name {
                "ARM_CLIENT_ID" => "6f1c2a4e-52f4-4e0b-9d8e-2f6a1b7c9d10",
                "ARM_CLIENT_SECRET" => "s3cret",
                "ARM_TENANT_ID" => "0a9b8c7d-6e5f-4a3b-2c1d-0e9f8a7b6c5d",
                "ARM_SUBSCRIPTION_ID" => "12345678-90ab-cdef-1234-567890abcdef",
                _ => return None,
            }
            .to_string(),
        )
    });
    let h = harness_with(DemoRunner::new(), material);

    let id = h.registry.create("web", bundle());
    let doc = finish(&h.registry, &id).await;
    assert_eq!(doc.status, DeploymentStatus::Completed);
    assert!(!doc.aggregated_log.contains("s3cret"));

    let invocations = h.runner.invocations();
    assert!(invocations.iter().all(|i| i.program != "az"));
    for invocation in invocations.iter().filter(|i| i.subcommand() != Some("version")) {
        assert_eq!(invocation.credential_names.len(), 4, "{:?}", invocation.args);
        assert!(invocation.working_dir.is_some());
    }
}

#[tokio::test]
async fn test_cancel_running_job() {
    let h = harness(DemoRunner::new().delay("terraform", "apply", Duration::from_secs(2)));

    let slow = h.registry.create("slow", bundle());
    let other = h.registry.create("other", bundle());

    tokio::time::timeout(WAIT, async {
        while h.registry.get(&slow).unwrap().status != DeploymentStatus::Applying {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert!(h.registry.cancel(&slow));
    let cancelled = finish(&h.registry, &slow).await;
    assert_eq!(cancelled.status, DeploymentStatus::Failed);
    assert_eq!(cancelled.updates.last().unwrap().message, "Deployment cancelled");
    assert!(cancelled.outputs.is_empty());

    let other = finish(&h.registry, &other).await;
    assert_eq!(other.status, DeploymentStatus::Completed);

    // Finished jobs accept the request but do not change
    assert!(h.registry.cancel(&slow));
    assert_eq!(h.registry.get(&slow).unwrap().updates.len(), cancelled.updates.len());
}

#[tokio::test]
async fn test_cancel_all_and_unknown_ids() {
    let h = harness(DemoRunner::new().delay("terraform", "init", Duration::from_secs(30)));

    let a = h.registry.create("a", bundle());
    let b = h.registry.create("b", bundle());
    assert!(!h.registry.cancel("no-such-job"));
    assert!(h.registry.wait("no-such-job").await.is_none());
    assert!(h.registry.get("no-such-job").is_none());

    assert_eq!(h.registry.cancel_all(), 2);
    tokio::time::timeout(WAIT, h.registry.wait_all()).await.unwrap();

    for id in [a, b] {
        let doc = h.registry.get(&id).unwrap();
        assert_invariants(&doc);
        assert_eq!(doc.status, DeploymentStatus::Failed);
    }
}

#[tokio::test]
async fn test_list_is_ordered_by_start() {
    let h = harness(DemoRunner::new());

    let first = h.registry.create("first", bundle());
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = h.registry.create("second", bundle());

    let listed: Vec<String> = h.registry.list().into_iter().map(|d| d.id).collect();
    assert_eq!(listed, vec![first.clone(), second.clone()]);
    assert_eq!(h.registry.len(), 2);

    finish(&h.registry, &first).await;
    finish(&h.registry, &second).await;
}
