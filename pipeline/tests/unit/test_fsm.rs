//! FSM unit tests

use sitepipe::fsm::{
    BuildEvent, BuildFsm, DeploymentEvent, DeploymentFsm, DomainEvent, DomainFsm,
};
use sitepipe::models::build::TemplateSelection;
use sitepipe::models::{
    BuildConfig, BuildFile, BuildId, BuildJob, BuildOutput, BuildStatus, Deployment,
    DeploymentStatus, DomainRecord, DomainStatus, DomainType, SiteConfig, SiteId,
    SourceDescriptor, SslStatus, UserId,
};
use sitepipe::PipelineError;
use tokio_test::{assert_err, assert_ok};

fn template_job() -> BuildJob {
    BuildJob::new(
        SiteId::new("site_1"),
        UserId::new("user_1"),
        SourceDescriptor::Template(TemplateSelection {
            template_id: "landing".to_string(),
            variables: Default::default(),
        }),
        BuildConfig::default(),
    )
}

#[test]
fn test_build_fsm_initial_state() {
    let fsm = BuildFsm::new();
    assert_eq!(fsm.state(), BuildStatus::Pending);
}

#[test]
fn test_build_success_flow() {
    let mut job = template_job();

    job.apply(BuildEvent::Start).unwrap();
    assert_eq!(job.status, BuildStatus::Building);
    assert!(job.started_at.is_some());

    let output = BuildOutput::from_files(vec![BuildFile::new(
        "/index.html",
        "<html></html>".to_string(),
        "text/html",
    )]);
    job.apply(BuildEvent::Complete(output)).unwrap();

    assert_eq!(job.status, BuildStatus::Completed);
    assert!(job.ended_at.is_some());
    assert_eq!(job.output.as_ref().unwrap().stats.total_files, 1);
}

#[test]
fn test_build_failure_keeps_reason() {
    let mut job = template_job();
    job.apply(BuildEvent::Start).unwrap();
    job.apply(BuildEvent::Fail("template not found".to_string()))
        .unwrap();

    assert_eq!(job.status, BuildStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("template not found"));
    assert!(job.output.is_none());
}

#[test]
fn test_pending_build_can_be_cancelled() {
    let mut job = template_job();
    job.apply(BuildEvent::Cancel).unwrap();
    assert_eq!(job.status, BuildStatus::Cancelled);
}

#[test]
fn test_terminal_build_is_immutable() {
    let mut job = template_job();
    job.apply(BuildEvent::Start).unwrap();
    job.apply(BuildEvent::Fail("boom".to_string())).unwrap();
    let updated_at = job.updated_at;

    for event in [
        BuildEvent::Start,
        BuildEvent::Cancel,
        BuildEvent::Fail("again".to_string()),
        BuildEvent::Complete(BuildOutput::from_files(vec![])),
    ] {
        let result = job.apply(event);
        assert!(matches!(result, Err(PipelineError::Conflict(_))));
    }

    assert_eq!(job.status, BuildStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("boom"));
    assert_eq!(job.updated_at, updated_at);
}

#[test]
fn test_deploy_success_flow() {
    let mut fsm = DeploymentFsm::new();

    // Pending -> Deploying
    fsm.process(DeploymentEvent::Deploy).unwrap();
    assert_eq!(fsm.state(), DeploymentStatus::Deploying);

    // Deploying -> Deployed
    fsm.process(DeploymentEvent::DeploySuccess).unwrap();
    assert_eq!(fsm.state(), DeploymentStatus::Deployed);
    assert!(fsm.error().is_none());
}

#[test]
fn test_deploy_failure_flow() {
    let mut fsm = DeploymentFsm::new();

    fsm.process(DeploymentEvent::Deploy).unwrap();
    fsm.process(DeploymentEvent::DeployFailed("publish timed out".to_string()))
        .unwrap();

    assert_eq!(fsm.state(), DeploymentStatus::Failed);
    assert_eq!(fsm.error(), Some("publish timed out"));
}

#[test]
fn test_deploy_invalid_transitions() {
    let mut fsm = DeploymentFsm::new();

    // Can't succeed without deploying first
    assert_err!(fsm.process(DeploymentEvent::DeploySuccess));

    // A failure needs a reason
    assert_err!(fsm.process(DeploymentEvent::DeployFailed(" ".to_string())));
    assert_ok!(fsm.process(DeploymentEvent::Deploy));

    // Deployed and failed are final
    let mut fsm = DeploymentFsm::resume(DeploymentStatus::Deployed);
    assert_err!(fsm.process(DeploymentEvent::Deploy));
    assert_err!(fsm.process(DeploymentEvent::DeployFailed("late".to_string())));

    let mut fsm = DeploymentFsm::resume(DeploymentStatus::Failed);
    assert_err!(fsm.process(DeploymentEvent::Deploy));
}

#[test]
fn test_deployment_apply_sets_timestamps() {
    let mut deployment = Deployment::new(
        SiteId::new("site_1"),
        BuildId::new("build_1"),
        1,
        vec![],
        SiteConfig::default(),
    );

    deployment.apply(DeploymentEvent::Deploy).unwrap();
    assert!(deployment.started_at.is_some());
    assert!(deployment.ended_at.is_none());

    deployment
        .apply(DeploymentEvent::DeployFailed("blob store offline".to_string()))
        .unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert_eq!(deployment.error.as_deref(), Some("blob store offline"));
    assert!(deployment.ended_at.is_some());

    assert!(matches!(
        deployment.apply(DeploymentEvent::DeploySuccess),
        Err(PipelineError::Conflict(_))
    ));
}

#[test]
fn test_domain_verify_then_issue() {
    let mut fsm = DomainFsm::new();
    assert_eq!(fsm.status(), DomainStatus::Pending);
    assert_eq!(fsm.ssl_status(), SslStatus::Pending);

    // Issuance is illegal before verification
    assert!(fsm
        .process(&DomainEvent::CertificateIssued {
            provider: "letsencrypt".to_string(),
            expires_at: None,
        })
        .is_err());

    fsm.process(&DomainEvent::Verified).unwrap();
    assert_eq!(fsm.status(), DomainStatus::Active);

    fsm.process(&DomainEvent::CertificateIssued {
        provider: "letsencrypt".to_string(),
        expires_at: None,
    })
    .unwrap();
    assert_eq!(fsm.ssl_status(), SslStatus::Issued);
}

#[test]
fn test_domain_failed_verification_can_be_retried() {
    let mut fsm = DomainFsm::new();
    fsm.process(&DomainEvent::VerificationFailed(
        "records not found: A example.com -> 203.0.113.10".to_string(),
    ))
    .unwrap();
    assert_eq!(fsm.status(), DomainStatus::Failed);

    fsm.process(&DomainEvent::Verified).unwrap();
    assert_eq!(fsm.status(), DomainStatus::Active);
}

#[test]
fn test_domain_reset_clears_certificate() {
    let mut record = DomainRecord::new(
        SiteId::new("site_1"),
        "example.com".to_string(),
        DomainType::Custom,
        vec![],
    );
    record.apply(DomainEvent::Verified).unwrap();
    record
        .apply(DomainEvent::CertificateIssued {
            provider: "letsencrypt".to_string(),
            expires_at: None,
        })
        .unwrap();
    assert!(record.verified_at.is_some());
    assert_eq!(record.ssl_provider.as_deref(), Some("letsencrypt"));

    record.apply(DomainEvent::Reset).unwrap();
    assert_eq!(record.status, DomainStatus::Pending);
    assert_eq!(record.ssl_status, SslStatus::Pending);
    assert!(record.verified_at.is_none());
    assert!(record.ssl_provider.is_none());
}
