//! End-to-end flow construction through the batch request processor, backed
//! by in-memory storage and catalog.

mod common;

use common::*;
use lbflow_core::constants::{
    ActionName, DetailState, FlowState, LockKind, ResourceType, SHARE_DATA_RESOURCE_ID,
};
use lbflow_core::error::FlowError;
use lbflow_core::models::{CloudRequest, Target, TargetSpec};
use lbflow_core::orchestration::{BatchOperation, BuildContext};
use lbflow_core::storage::memory::StorageOp;
use lbflow_core::storage::Storage;
use std::collections::HashSet;

#[tokio::test]
async fn test_1200_targets_with_limit_500_yield_three_chained_tasks() {
    let h = Harness::new();
    let targets = h.bound_group("tg-1", "lb-1", 1200);

    let submission = h
        .processor
        .process(
            &BuildContext::new(),
            h.request(BatchOperation::ModifyTargetWeight {
                target_ids: ids(&targets),
                new_weight: 30,
            }),
        )
        .await
        .unwrap();

    assert!(submission.is_complete());
    assert_eq!(submission.flow_ids.len(), 1);
    let flow_id = submission.flow_ids[0];

    let flow = h.storage.get_flow(flow_id).await.unwrap().unwrap();
    assert_eq!(flow.state, FlowState::Pending);
    assert_eq!(flow.share_data[SHARE_DATA_RESOURCE_ID], "lb-1");

    let sizes: Vec<usize> = flow.tasks.iter().map(|t| t.params.detail_ids.len()).collect();
    assert_eq!(sizes, vec![500, 500, 200]);
    assert!(flow
        .tasks
        .iter()
        .all(|t| t.params.request.item_count() == t.params.detail_ids.len()));
    assert!(flow.tasks[0].depends_on.is_empty());
    assert_eq!(flow.tasks[1].depends_on, vec![flow.tasks[0].action_id.clone()]);
    assert_eq!(flow.tasks[2].depends_on, vec![flow.tasks[1].action_id.clone()]);
    assert!(flow
        .tasks
        .iter()
        .all(|t| t.action_name == ActionName::ModifyTargetWeight && t.retry == h.config.retry));

    let details = h
        .storage
        .list_task_details(submission.task_management_id)
        .await
        .unwrap();
    assert_eq!(details.len(), 1200);
    let action_ids: HashSet<_> = flow.tasks.iter().map(|t| t.action_id.clone()).collect();
    for detail in &details {
        assert_eq!(detail.flow_id, Some(flow_id));
        assert_eq!(detail.state, DetailState::Pending);
        assert!(action_ids.contains(detail.action_id.as_ref().unwrap()));
    }

    let tm = h
        .storage
        .get_task_management(submission.task_management_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tm.flow_ids, vec![flow_id]);
    assert_eq!(tm.source, "api");

    let owner = h
        .storage
        .find_resource_relation("lb-1", ResourceType::LoadBalancer)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(owner.flow_id, flow_id);
    assert_eq!(owner.lock_kind, LockKind::TargetGroupModify);
}

#[tokio::test]
async fn test_duplicate_instance_in_chunk_writes_nothing() {
    let h = Harness::new();
    let mut targets = h.bound_group("tg-1", "lb-1", 3);
    let twin = Target {
        id: "tg-1-twin".to_string(),
        cloud_inst_id: targets[0].cloud_inst_id.clone(),
        ..targets[1].clone()
    };
    h.catalog.insert_target(twin.clone());
    targets.push(twin);

    let submission = h
        .processor
        .process(
            &BuildContext::new(),
            h.request(BatchOperation::ModifyTargetPort {
                target_ids: ids(&targets),
                new_port: 9090,
            }),
        )
        .await
        .unwrap();

    assert_eq!(submission.first_error().unwrap().code(), "record_duplicated");
    assert!(submission.flow_ids.is_empty());
    assert_eq!(h.storage.detail_count(), 0);
    assert_eq!(h.storage.flow_count(), 0);
    assert_eq!(h.storage.relation_count(), 0);
}

#[tokio::test]
async fn test_busy_load_balancer_gets_no_tasks_or_details() {
    let h = Harness::new();
    let targets = h.bound_group("tg-1", "lb-1", 10);
    h.processor
        .flow_builder()
        .gate()
        .lock(
            &BuildContext::new(),
            "lb-1",
            ResourceType::LoadBalancer,
            999,
            LockKind::ListenerDelete,
        )
        .await
        .unwrap();

    let submission = h
        .processor
        .process(
            &BuildContext::new(),
            h.request(BatchOperation::RemoveTargets {
                target_ids: ids(&targets),
            }),
        )
        .await
        .unwrap();

    assert_eq!(
        submission.first_error(),
        Some(&FlowError::ResourceBusy {
            resource_id: "lb-1".to_string(),
            resource_type: ResourceType::LoadBalancer,
            owner_flow_id: 999,
            lock_kind: LockKind::ListenerDelete,
        })
    );
    assert_eq!(h.storage.detail_count(), 0);
    assert_eq!(h.storage.flow_count(), 0);
}

#[tokio::test]
async fn test_failure_after_details_fails_every_detail() {
    let h = Harness::new();
    let targets = h.bound_group("tg-1", "lb-1", 1200);
    h.storage
        .fail_on(StorageOp::CreateSubFlowRelations, "sub flow insert failed");

    let submission = h
        .processor
        .process(
            &BuildContext::new(),
            h.request(BatchOperation::ModifyTargetWeight {
                target_ids: ids(&targets),
                new_weight: 0,
            }),
        )
        .await
        .unwrap();

    assert_eq!(
        submission.first_error(),
        Some(&FlowError::Aborted("sub flow insert failed".to_string()))
    );
    assert!(submission.flow_ids.is_empty());

    let details = h.storage.all_details();
    assert_eq!(state_counts(&details), (0, 0, 1200));
    assert!(details
        .iter()
        .all(|d| d.reason.as_deref().is_some_and(|r| !r.is_empty())));

    // the flow row stays behind, never activated and never locked
    assert_eq!(h.storage.flow_count(), 1);
    let flow_id = details[0].flow_id.unwrap();
    let flow = h.storage.get_flow(flow_id).await.unwrap().unwrap();
    assert_eq!(flow.state, FlowState::Init);
    assert_eq!(h.storage.relation_count(), 0);
}

#[tokio::test]
async fn test_failure_while_chaining_fails_details_created_so_far() {
    let h = Harness::new();
    let targets = h.bound_group("tg-1", "lb-1", 1200);
    h.storage
        .fail_nth(StorageOp::CreateTaskDetails, 2, "detail insert failed");

    let submission = h
        .processor
        .process(
            &BuildContext::new(),
            h.request(BatchOperation::ModifyTargetWeight {
                target_ids: ids(&targets),
                new_weight: 5,
            }),
        )
        .await
        .unwrap();

    assert_eq!(submission.first_error().unwrap().code(), "aborted");
    assert_eq!(state_counts(&h.storage.all_details()), (0, 0, 500));
    assert_eq!(h.storage.flow_count(), 0);
}

#[tokio::test]
async fn test_unbound_target_group_resolves_without_flow() {
    let h = Harness::new();
    let targets = h.unbound_group("tg-free", 4);

    let submission = h
        .processor
        .process(
            &BuildContext::new(),
            h.request(BatchOperation::RemoveTargets {
                target_ids: ids(&targets),
            }),
        )
        .await
        .unwrap();

    assert!(submission.is_complete());
    assert!(submission.flow_ids.is_empty());
    assert_eq!(submission.resolved_detail_ids.len(), 4);
    assert_eq!(h.storage.flow_count(), 0);
    assert_eq!(state_counts(&h.storage.all_details()), (0, 4, 0));
    assert_eq!(h.catalog.target_count(), 0);
}

#[tokio::test]
async fn test_load_balancers_are_built_independently() {
    let h = Harness::new();
    let mut targets = h.bound_group("tg-a", "lb-1", 3);
    targets.extend(h.bound_group("tg-b", "lb-2", 2));
    targets.extend(h.bound_group("tg-c", "lb-1", 2));
    targets.extend(h.unbound_group("tg-free", 2));

    h.processor
        .flow_builder()
        .gate()
        .lock(
            &BuildContext::new(),
            "lb-2",
            ResourceType::LoadBalancer,
            500,
            LockKind::TargetGroupModify,
        )
        .await
        .unwrap();

    let submission = h
        .processor
        .process(
            &BuildContext::new(),
            h.request(BatchOperation::ModifyTargetWeight {
                target_ids: ids(&targets),
                new_weight: 40,
            }),
        )
        .await
        .unwrap();

    assert_eq!(submission.flow_ids.len(), 1);
    assert_eq!(submission.failures.len(), 1);
    assert_eq!(submission.failures[0].resource_id, "lb-2");
    assert_eq!(submission.first_error().unwrap().code(), "resource_busy");
    assert_eq!(submission.resolved_detail_ids.len(), 2);

    // both target groups of lb-1 share one flow, one chunk each
    let flow = h
        .storage
        .get_flow(submission.flow_ids[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(flow.tasks.len(), 2);
    assert_eq!(flow.tasks[1].depends_on, vec![flow.tasks[0].action_id.clone()]);
    let subs = h.storage.list_sub_flow_relations(flow.id).await.unwrap();
    let sub_ids: HashSet<&str> = subs.iter().map(|s| s.resource_id.as_str()).collect();
    assert_eq!(sub_ids, HashSet::from(["tg-a", "tg-c"]));

    let tm = h
        .storage
        .get_task_management(submission.task_management_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tm.flow_ids, submission.flow_ids);
    assert_eq!(h.catalog.target("tg-free-target-0").unwrap().weight, 40);

    assert!(submission.into_result().is_err());
}

#[tokio::test]
async fn test_second_request_waits_for_release() {
    let h = Harness::new();
    let targets = h.bound_group("tg-1", "lb-1", 2);
    let request = h.request(BatchOperation::ModifyTargetWeight {
        target_ids: ids(&targets),
        new_weight: 20,
    });

    let first = h
        .processor
        .process(&BuildContext::new(), request.clone())
        .await
        .unwrap();
    let second = h
        .processor
        .process(&BuildContext::new(), request.clone())
        .await
        .unwrap();
    assert_eq!(second.first_error().unwrap().code(), "resource_busy");

    let released = h
        .processor
        .flow_builder()
        .gate()
        .release("lb-1", ResourceType::LoadBalancer, first.flow_ids[0])
        .await
        .unwrap();
    assert!(released);

    let third = h
        .processor
        .process(&BuildContext::new(), request)
        .await
        .unwrap();
    assert!(third.is_complete());
    assert_ne!(third.flow_ids, first.flow_ids);
}

#[tokio::test]
async fn test_delete_listeners_flow() {
    let h = Harness::new();
    h.load_balancer("lb-1");
    let listeners = h.listeners("lb-1", 45);

    let submission = h
        .processor
        .process(
            &BuildContext::new(),
            h.request(BatchOperation::DeleteListeners {
                lb_id: "lb-1".to_string(),
                listener_ids: listeners.iter().map(|l| l.id.clone()).collect(),
            }),
        )
        .await
        .unwrap();

    let flow = h
        .storage
        .get_flow(submission.flow_ids[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(flow.tasks.len(), 3);
    match &flow.tasks[0].params.request {
        CloudRequest::DeleteListeners(req) => {
            assert_eq!(req.lb_cloud_id, "lb-1-cloud");
            assert_eq!(req.listeners.len(), 20);
        }
        other => panic!("unexpected request {other:?}"),
    }

    let owner = h
        .storage
        .find_resource_relation("lb-1", ResourceType::LoadBalancer)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(owner.lock_kind, LockKind::ListenerDelete);
    assert_eq!(h.storage.list_sub_flow_relations(flow.id).await.unwrap().len(), 45);
    assert_eq!(h.storage.detail_count(), 45);
}

#[tokio::test]
async fn test_bind_target_group_flow() {
    let h = Harness::new();
    h.load_balancer("lb-1");
    h.unbound_group("tg-new", 3);
    let binding = h.binding("tg-new", "lb-1");

    let submission = h
        .processor
        .process(
            &BuildContext::new(),
            h.request(BatchOperation::BindTargetGroups {
                bindings: vec![binding.clone()],
            }),
        )
        .await
        .unwrap();

    let flow = h
        .storage
        .get_flow(submission.flow_ids[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(flow.tasks.len(), 2);
    match &flow.tasks[0].params.request {
        CloudRequest::BindTargetGroupRule(req) => assert_eq!(req.binding, binding),
        other => panic!("unexpected request {other:?}"),
    }
    match &flow.tasks[1].params.request {
        CloudRequest::RegisterTargets(req) => {
            assert_eq!(req.binding, binding);
            assert_eq!(req.targets.len(), 3);
        }
        other => panic!("unexpected request {other:?}"),
    }
    assert_eq!(flow.tasks[1].depends_on, vec![flow.tasks[0].action_id.clone()]);
    // one rule detail plus one per target
    assert_eq!(h.storage.detail_count(), 4);

    // a target group that is already bound cannot be bound again
    h.catalog.insert_binding(binding.clone());
    let err = h
        .processor
        .process(
            &BuildContext::new(),
            h.request(BatchOperation::BindTargetGroups {
                bindings: vec![binding],
            }),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "record_not_update");
}

#[tokio::test]
async fn test_bind_registers_targets_within_add_limit() {
    let h = Harness::new();
    h.load_balancer("lb-1");
    h.unbound_group("tg-big", 300);
    let binding = h.binding("tg-big", "lb-1");

    let submission = h
        .processor
        .process(
            &BuildContext::new(),
            h.request(BatchOperation::BindTargetGroups {
                bindings: vec![binding],
            }),
        )
        .await
        .unwrap()
        .into_result()
        .unwrap();

    let flow = h
        .storage
        .get_flow(submission.flow_ids[0])
        .await
        .unwrap()
        .unwrap();
    // default add limit is 100: one rule binding, then three registrations
    assert_eq!(flow.tasks.len(), 4);
    assert_eq!(flow.tasks[0].action_name, ActionName::BindTargetGroupRule);
    let mut registered = 0;
    for task in &flow.tasks[1..] {
        match &task.params.request {
            CloudRequest::RegisterTargets(req) => {
                assert!(req.targets.len() <= h.config.batch_limits.add_targets);
                assert_eq!(req.targets.len(), task.params.detail_ids.len());
                registered += req.targets.len();
            }
            other => panic!("unexpected request {other:?}"),
        }
    }
    assert_eq!(registered, 300);
    assert!(flow.tasks[0].depends_on.is_empty());
    assert!(flow
        .tasks
        .windows(2)
        .all(|w| w[1].depends_on == vec![w[0].action_id.clone()]));
    assert_eq!(h.storage.detail_count(), 301);
}

#[tokio::test]
async fn test_bind_to_unknown_listener_writes_nothing() {
    let h = Harness::new();
    h.load_balancer("lb-1");
    h.unbound_group("tg-new", 2);
    let mut binding = h.binding("tg-new", "lb-1");
    binding.listener_id = "missing-listener".to_string();

    let err = h
        .processor
        .process(
            &BuildContext::new(),
            h.request(BatchOperation::BindTargetGroups {
                bindings: vec![binding],
            }),
        )
        .await
        .unwrap_err();

    assert_eq!(
        err,
        FlowError::RecordNotFound("listener missing-listener".to_string())
    );
    assert_eq!(h.storage.call_count(StorageOp::CreateTaskManagement), 0);
    assert_eq!(h.storage.detail_count(), 0);
    assert_eq!(h.storage.flow_count(), 0);
}

#[tokio::test]
async fn test_bind_to_listener_of_other_load_balancer_is_rejected() {
    let h = Harness::new();
    h.load_balancer("lb-1");
    h.load_balancer("lb-2");
    h.unbound_group("tg-new", 2);
    // listener lives on lb-2, binding claims lb-1
    let mut binding = h.binding("tg-new", "lb-2");
    binding.lb_id = "lb-1".to_string();
    binding.lb_cloud_id = "lb-1-cloud".to_string();

    let err = h
        .processor
        .process(
            &BuildContext::new(),
            h.request(BatchOperation::BindTargetGroups {
                bindings: vec![binding.clone()],
            }),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_parameter");
    assert!(err.to_string().contains("lb-2"));

    binding.lb_id = "lb-2".to_string();
    binding.lb_cloud_id = "lb-2-cloud".to_string();
    binding.listener_cloud_id = "stale-cloud-id".to_string();
    let err = h
        .processor
        .process(
            &BuildContext::new(),
            h.request(BatchOperation::BindTargetGroups {
                bindings: vec![binding],
            }),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_parameter");
    assert_eq!(h.storage.detail_count(), 0);
    assert_eq!(h.storage.flow_count(), 0);
}

#[tokio::test]
async fn test_add_targets_bound_and_unbound() {
    let h = Harness::new();
    h.bound_group("tg-live", "lb-1", 0);
    h.unbound_group("tg-draft", 0);
    let specs: Vec<TargetSpec> = (0..150)
        .map(|i| TargetSpec {
            cloud_inst_id: format!("ins-new-{i}"),
            ip: format!("10.9.{}.{}", i / 256, i % 256),
            port: 80,
            weight: 10,
        })
        .collect();

    let bound = h
        .processor
        .process(
            &BuildContext::new(),
            h.request(BatchOperation::AddTargets {
                target_group_id: "tg-live".to_string(),
                targets: specs.clone(),
            }),
        )
        .await
        .unwrap();
    let flow = h
        .storage
        .get_flow(bound.flow_ids[0])
        .await
        .unwrap()
        .unwrap();
    // default add limit is 100
    assert_eq!(flow.tasks.len(), 2);
    assert_eq!(flow.tasks[0].action_name, ActionName::RegisterTargets);
    assert_eq!(h.catalog.target_count(), 0);

    let local = h
        .processor
        .process(
            &BuildContext::new(),
            h.request(BatchOperation::AddTargets {
                target_group_id: "tg-draft".to_string(),
                targets: specs,
            }),
        )
        .await
        .unwrap();
    assert!(local.flow_ids.is_empty());
    assert_eq!(local.resolved_detail_ids.len(), 150);
    assert_eq!(h.catalog.target_count(), 150);
}

#[tokio::test]
async fn test_unknown_target_aborts_before_any_write() {
    let h = Harness::new();
    let mut target_ids = ids(&h.bound_group("tg-1", "lb-1", 2));
    target_ids.push("missing-target".to_string());

    let err = h
        .processor
        .process(
            &BuildContext::new(),
            h.request(BatchOperation::RemoveTargets { target_ids }),
        )
        .await
        .unwrap_err();

    assert_eq!(err, FlowError::RecordNotFound("target missing-target".to_string()));
    assert_eq!(h.storage.call_count(StorageOp::CreateTaskManagement), 0);
    assert_eq!(h.storage.detail_count(), 0);
}

#[tokio::test]
async fn test_foreign_account_is_rejected() {
    let h = Harness::new();
    let targets = h.bound_group("tg-1", "lb-1", 1);
    let mut request = h.request(BatchOperation::RemoveTargets {
        target_ids: ids(&targets),
    });
    request.account_id = "someone-else".to_string();

    let err = h
        .processor
        .process(&BuildContext::new(), request)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_parameter");
}

#[tokio::test]
async fn test_expired_deadline_aborts_request() {
    let h = Harness::new();
    let targets = h.bound_group("tg-1", "lb-1", 2);
    let ctx = BuildContext::new().with_deadline(tokio::time::Instant::now());

    let err = h
        .processor
        .process(
            &ctx,
            h.request(BatchOperation::RemoveTargets {
                target_ids: ids(&targets),
            }),
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), "aborted");
    assert_eq!(h.storage.call_count(StorageOp::CreateTaskManagement), 0);
}
