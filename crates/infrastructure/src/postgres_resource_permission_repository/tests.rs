use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use permsync_application::{
    DesiredPermissions, RandomUidGenerator, ResourcePermissionQuery, ResourcePermissionRepository,
    SearchUsersPermissionsQuery, UidGenerator,
};
use permsync_core::{AppError, AppResult, OrgId};
use permsync_domain::{BuiltinRole, ManagedSubject, PermissionClass, Scope, TeamId, UserId};
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;

use super::PostgresResourcePermissionRepository;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

async fn test_pool() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        return None;
    };

    let pool = match PgPoolOptions::new()
        .max_connections(4)
        .connect(database_url.as_str())
        .await
    {
        Ok(pool) => pool,
        Err(error) => panic!("failed to connect to DATABASE_URL in test: {error}"),
    };

    if let Err(error) = MIGRATOR.run(&pool).await {
        panic!("failed to run migrations for postgres permission tests: {error}");
    }

    Some(pool)
}

struct FixedUidGenerator;

impl UidGenerator for FixedUidGenerator {
    fn generate(&self) -> AppResult<String> {
        Ok("fixeduid".to_owned())
    }
}

fn repository(pool: &PgPool) -> PostgresResourcePermissionRepository {
    PostgresResourcePermissionRepository::new(pool.clone(), Arc::new(RandomUidGenerator))
}

static ORG_SEQUENCE: AtomicI64 = AtomicI64::new(0);

fn unique_org() -> OrgId {
    let sequence = ORG_SEQUENCE.fetch_add(1, Ordering::Relaxed) % 100;
    OrgId::new(Utc::now().timestamp_micros() * 100 + sequence)
}

fn unique_suffix() -> String {
    RandomUidGenerator.generate().unwrap_or_default()
}

async fn insert_user(pool: &PgPool, is_admin: bool) -> UserId {
    let login = format!("user-{}", unique_suffix());
    let user_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO user_account (login, email, is_admin)
        VALUES ($1, $2, $3)
        RETURNING id
        "#,
    )
    .bind(login.as_str())
    .bind(format!("{login}@example.com"))
    .bind(is_admin)
    .fetch_one(pool)
    .await;

    assert!(user_id.is_ok());
    UserId::new(user_id.unwrap_or_default())
}

async fn insert_team(pool: &PgPool, org_id: OrgId) -> TeamId {
    let team_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO team (org_id, name, email)
        VALUES ($1, $2, '')
        RETURNING id
        "#,
    )
    .bind(org_id.as_i64())
    .bind(format!("team-{}", unique_suffix()))
    .fetch_one(pool)
    .await;

    assert!(team_id.is_ok());
    TeamId::new(team_id.unwrap_or_default())
}

fn desired(subject: ManagedSubject, actions: &[&str]) -> DesiredPermissions {
    DesiredPermissions {
        subject,
        scope: Scope::new("dashboards", "uid", "abc"),
        actions: actions.iter().map(|action| (*action).to_owned()).collect(),
    }
}

fn dashboard_query(actions: &[&str]) -> ResourcePermissionQuery {
    ResourcePermissionQuery {
        actions: actions.iter().map(|action| (*action).to_owned()).collect(),
        resource: "dashboards".to_owned(),
        resource_attribute: "uid".to_owned(),
        resource_id: "abc".to_owned(),
        ..ResourcePermissionQuery::default()
    }
}

#[tokio::test]
async fn first_grant_creates_managed_role_and_second_is_a_no_op() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = repository(&pool);
    let org_id = unique_org();
    let user_id = insert_user(&pool, false).await;
    let subject = ManagedSubject::User(user_id);

    let first = repository
        .set_resource_permissions(org_id, vec![desired(subject, &["dashboards:read"])])
        .await;
    assert!(first.is_ok());
    let first = first.unwrap_or_default();
    assert_eq!(first.len(), 1);
    assert!(first[0].role_created);
    assert_eq!(first[0].role.name, format!("managed:users:{user_id}"));
    assert_eq!(first[0].inserted, vec!["dashboards:read".to_owned()]);
    assert_eq!(
        first[0]
            .permission
            .as_ref()
            .map(|permission| permission.actions.clone()),
        Some(vec!["dashboards:read".to_owned()])
    );

    let second = repository
        .set_resource_permissions(org_id, vec![desired(subject, &["dashboards:read"])])
        .await;
    assert!(second.is_ok());
    let second = second.unwrap_or_default();
    assert!(!second[0].changed());
    assert_eq!(second[0].role.uid, first[0].role.uid);

    let permissions = repository
        .get_resource_permissions(org_id, &dashboard_query(&["dashboards:read"]))
        .await;
    assert!(permissions.is_ok());
    let permissions = permissions.unwrap_or_default();
    assert_eq!(permissions.len(), 1);
    assert_eq!(permissions[0].class(), PermissionClass::Managed);
    assert_eq!(permissions[0].actions, vec!["dashboards:read".to_owned()]);
}

#[tokio::test]
async fn empty_desired_set_revokes_every_action() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = repository(&pool);
    let org_id = unique_org();
    let team_id = insert_team(&pool, org_id).await;
    let subject = ManagedSubject::Team(team_id);

    let granted = repository
        .set_resource_permissions(
            org_id,
            vec![desired(subject, &["dashboards:read", "dashboards:write"])],
        )
        .await;
    assert!(granted.is_ok());

    let revoked = repository
        .set_resource_permissions(org_id, vec![desired(subject, &[])])
        .await;
    assert!(revoked.is_ok());
    let revoked = revoked.unwrap_or_default();
    assert!(revoked[0].permission.is_none());
    assert_eq!(revoked[0].removed.len(), 2);

    let permissions = repository
        .get_resource_permissions(org_id, &dashboard_query(&["dashboards:read"]))
        .await;
    assert!(permissions.is_ok());
    assert!(permissions.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn unknown_user_is_rejected_and_rolled_back() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = repository(&pool);
    let org_id = unique_org();
    let subject = ManagedSubject::User(UserId::new(i64::MAX));

    let result = repository
        .set_resource_permissions(org_id, vec![desired(subject, &["dashboards:read"])])
        .await;
    assert!(matches!(result, Err(AppError::SubjectNotFound(_))));

    let grants = repository.find_subject_grants(org_id, subject).await;
    assert!(grants.is_ok());
    assert!(grants.unwrap_or_default().is_none());
}

#[tokio::test]
async fn concurrent_first_grants_create_one_role() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = repository(&pool);
    let org_id = unique_org();
    let subject = ManagedSubject::BuiltinRole(BuiltinRole::Editor);

    let (left, right) = tokio::join!(
        repository.set_resource_permissions(
            org_id,
            vec![desired(subject, &["dashboards:read"])]
        ),
        repository.set_resource_permissions(
            org_id,
            vec![desired(subject, &["dashboards:read"])]
        ),
    );
    assert!(left.is_ok());
    assert!(right.is_ok());

    let role_count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT count(*) FROM role WHERE org_id = $1 AND name = 'managed:builtins:editor'
        "#,
    )
    .bind(org_id.as_i64())
    .fetch_one(&pool)
    .await;
    assert_eq!(role_count.unwrap_or_default(), 1);

    let assignment_count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT count(*) FROM builtin_role WHERE org_id = $1 AND role = 'Editor'
        "#,
    )
    .bind(org_id.as_i64())
    .fetch_one(&pool)
    .await;
    assert_eq!(assignment_count.unwrap_or_default(), 1);
}

#[tokio::test]
async fn colliding_uids_exhaust_generation() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository =
        PostgresResourcePermissionRepository::new(pool.clone(), Arc::new(FixedUidGenerator));
    let org_id = unique_org();

    let first = repository
        .set_resource_permissions(
            org_id,
            vec![desired(
                ManagedSubject::BuiltinRole(BuiltinRole::Viewer),
                &["dashboards:read"],
            )],
        )
        .await;
    assert!(first.is_ok());

    let second = repository
        .set_resource_permissions(
            org_id,
            vec![desired(
                ManagedSubject::BuiltinRole(BuiltinRole::Admin),
                &["dashboards:read"],
            )],
        )
        .await;
    assert!(matches!(second, Err(AppError::IdGenerationExhausted(_))));
}

#[tokio::test]
async fn subject_cleanup_removes_role_and_reports_grants() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = repository(&pool);
    let org_id = unique_org();
    let team_id = insert_team(&pool, org_id).await;
    let subject = ManagedSubject::Team(team_id);

    let granted = repository
        .set_resource_permissions(org_id, vec![desired(subject, &["dashboards:read"])])
        .await;
    assert!(granted.is_ok());
    let role_uid = granted
        .unwrap_or_default()
        .first()
        .map(|applied| applied.role.uid.clone());

    let cleanup = repository.delete_all_for_subject(org_id, subject).await;
    assert!(cleanup.is_ok());
    let cleanup = cleanup.unwrap_or_default();
    assert_eq!(cleanup.removed_role_uids, role_uid.into_iter().collect::<Vec<_>>());
    assert_eq!(cleanup.removed_grants.len(), 1);
    assert_eq!(cleanup.removed_grants[0].action, "dashboards:read");

    let grants = repository.find_subject_grants(org_id, subject).await;
    assert!(grants.is_ok());
    assert!(grants.unwrap_or_default().is_none());
}

#[tokio::test]
async fn global_user_cleanup_removes_org_level_managed_role() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = repository(&pool);
    let org_id = unique_org();
    let user_id = insert_user(&pool, false).await;
    let subject = ManagedSubject::User(user_id);

    let granted = repository
        .set_resource_permissions(org_id, vec![desired(subject, &["dashboards:read"])])
        .await;
    assert!(granted.is_ok());
    let role_uid = granted
        .unwrap_or_default()
        .first()
        .map(|applied| applied.role.uid.clone())
        .unwrap_or_default();

    let cleanup = repository
        .delete_all_for_subject(OrgId::GLOBAL, subject)
        .await;
    assert!(cleanup.is_ok());
    let cleanup = cleanup.unwrap_or_default();
    assert_eq!(cleanup.removed_role_uids, vec![role_uid.clone()]);
    assert_eq!(cleanup.removed_grants.len(), 1);
    assert_eq!(cleanup.removed_grants[0].role_uid, role_uid);

    let grants = repository.find_subject_grants(org_id, subject).await;
    assert!(grants.is_ok());
    assert!(grants.unwrap_or_default().is_none());
}

#[tokio::test]
async fn action_prefix_matches_wildcard_characters_literally() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = repository(&pool);
    let org_id = unique_org();
    let user_id = insert_user(&pool, false).await;

    let granted = repository
        .set_resource_permissions(
            org_id,
            vec![desired(ManagedSubject::User(user_id), &["dashboards:read"])],
        )
        .await;
    assert!(granted.is_ok());

    let search = |prefix: &str| SearchUsersPermissionsQuery {
        user_id: Some(user_id),
        action_prefix: Some(prefix.to_owned()),
        ..SearchUsersPermissionsQuery::default()
    };

    let wildcard = repository
        .search_users_permissions(org_id, &search("dash%"))
        .await;
    assert!(wildcard.is_ok());
    assert!(wildcard.unwrap_or_default().is_empty());

    let literal = repository
        .search_users_permissions(org_id, &search("dashboards:"))
        .await;
    assert!(literal.is_ok());
    assert_eq!(literal.unwrap_or_default().get(&user_id).map(Vec::len), Some(1));
}

#[tokio::test]
async fn basic_role_members_and_server_admins_are_searched() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = repository(&pool);
    let org_id = unique_org();
    let editor = insert_user(&pool, false).await;

    let membership = sqlx::query(
        r#"
        INSERT INTO org_user (org_id, user_id, role)
        VALUES ($1, $2, 'Editor')
        "#,
    )
    .bind(org_id.as_i64())
    .bind(editor.as_i64())
    .execute(&pool)
    .await;
    assert!(membership.is_ok());

    let granted = repository
        .set_resource_permissions(
            org_id,
            vec![desired(
                ManagedSubject::BuiltinRole(BuiltinRole::Editor),
                &["dashboards:write"],
            )],
        )
        .await;
    assert!(granted.is_ok());

    let found = repository
        .search_users_permissions(
            org_id,
            &SearchUsersPermissionsQuery {
                user_id: Some(editor),
                scope: Some("dashboards:uid:abc".to_owned()),
                ..SearchUsersPermissionsQuery::default()
            },
        )
        .await;
    assert!(found.is_ok());
    let found = found.unwrap_or_default();
    let editor_actions: Vec<String> = found
        .get(&editor)
        .map(|actions| actions.iter().map(|entry| entry.action.clone()).collect())
        .unwrap_or_default();
    assert_eq!(editor_actions, vec!["dashboards:write".to_owned()]);

    let admin = insert_user(&pool, true).await;
    let roles = repository.get_users_basic_roles(org_id, &[editor, admin]).await;
    assert!(roles.is_ok());
    let roles = roles.unwrap_or_default();
    assert_eq!(roles.get(&editor), Some(&vec!["Editor".to_owned()]));
    assert_eq!(roles.get(&admin), Some(&vec!["Server Admin".to_owned()]));
}
