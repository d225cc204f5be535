#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Scope lifecycle: commit, rollback, exit, closure form, drop and failed flushes.

#[cfg(feature = "sqlite")]
mod common;

#[cfg(feature = "sqlite")]
mod sqlite_scope_tests {
    use std::time::Duration;

    use modkit_uow::{
        CreateMixin, FieldMap, InstanceState, ReadMixin, RepoError, ScopeState, TransactionError,
        TxErrorKind, TxStage, UpdateMixin,
    };

    use crate::common::{
        NoteRepository, UserRepository, by_name, committed_users, id_of, position_of, seed, setup,
        user_data,
    };

    #[tokio::test]
    async fn commit_persists_and_detaches_instances() {
        let factory = setup().await;

        let uow = factory.begin().await.unwrap();
        let alice = UserRepository::create(uow.session(), &user_data("Alice", "Engineer")).unwrap();
        uow.flush().await.unwrap();
        assert!(id_of(&alice) > 0);
        assert_eq!(alice.state(), InstanceState::Persistent);
        assert_eq!(uow.state(), ScopeState::Open);
        uow.commit().await.unwrap();

        assert_eq!(alice.state(), InstanceState::Detached);
        assert!(!alice.is_attached());
        assert_eq!(
            alice.get(crate::common::user::Column::Name),
            Some("Alice".into())
        );
        assert_eq!(committed_users(&factory).await, 1);
    }

    #[tokio::test]
    async fn commit_flushes_staged_writes() {
        let factory = setup().await;

        let uow = factory.begin().await.unwrap();
        let bob = UserRepository::create(uow.session(), &user_data("Bob", "QA")).unwrap();
        assert_eq!(uow.session().pending_count(), 1);
        uow.commit().await.unwrap();

        assert!(id_of(&bob) > 0);
        assert_eq!(committed_users(&factory).await, 1);
    }

    #[tokio::test]
    async fn rollback_discards_flushed_writes() {
        let factory = setup().await;

        let uow = factory.begin().await.unwrap();
        let carol = UserRepository::create(uow.session(), &user_data("Carol", "Ops")).unwrap();
        uow.flush().await.unwrap();
        uow.rollback().await.unwrap();

        assert_eq!(committed_users(&factory).await, 0);
        assert_eq!(carol.state(), InstanceState::Transient);
        assert!(carol.get(crate::common::user::Column::Id).is_none());
    }

    #[tokio::test]
    async fn rolled_back_instance_can_be_added_again() {
        let factory = setup().await;

        let uow = factory.begin().await.unwrap();
        let dave = UserRepository::create(uow.session(), &user_data("Dave", "Dev")).unwrap();
        uow.flush().await.unwrap();
        uow.rollback().await.unwrap();

        let uow = factory.begin().await.unwrap();
        uow.session().add(&dave).unwrap();
        assert_eq!(dave.state(), InstanceState::Pending);
        uow.commit().await.unwrap();

        assert_eq!(committed_users(&factory).await, 1);
        assert_eq!(dave.state(), InstanceState::Detached);
    }

    #[tokio::test]
    async fn rolled_back_update_is_not_carried_into_a_later_scope() {
        let factory = setup().await;
        seed(&factory, &["Alice"], "Engineer").await;

        let uow = factory.begin().await.unwrap();
        let alice = UserRepository::get_one(uow.session(), &by_name("Alice"))
            .await
            .unwrap();
        UserRepository::update(&alice, &FieldMap::new().with("position", "Discarded")).unwrap();
        uow.flush().await.unwrap();
        uow.rollback().await.unwrap();

        assert_eq!(alice.state(), InstanceState::Detached);
        assert_eq!(position_of(&alice).as_deref(), Some("Engineer"));
        assert_eq!(alice.model().unwrap().position.as_deref(), Some("Engineer"));
        assert!(!alice.is_modified());

        let uow = factory.begin().await.unwrap();
        uow.session().add(&alice).unwrap();
        UserRepository::update(&alice, &FieldMap::new().with("name", "Alicia")).unwrap();
        uow.commit().await.unwrap();

        let uow = factory.begin().await.unwrap();
        let alicia = UserRepository::get_one(uow.session(), &by_name("Alicia"))
            .await
            .unwrap();
        assert_eq!(position_of(&alicia).as_deref(), Some("Engineer"));
        uow.commit().await.unwrap();
    }

    #[tokio::test]
    async fn exit_commits_on_ok_and_returns_the_value() {
        let factory = setup().await;

        let uow = factory.begin().await.unwrap();
        let outcome = async {
            let eve = UserRepository::create(uow.session(), &user_data("Eve", "Sec"))?;
            uow.flush().await?;
            Ok::<_, RepoError>(id_of(&eve))
        }
        .await;
        let id = uow.exit(outcome).await.unwrap();

        assert!(id > 0);
        assert_eq!(committed_users(&factory).await, 1);
    }

    #[tokio::test]
    async fn exit_rolls_back_on_err_and_returns_the_original_error() {
        let factory = setup().await;

        let uow = factory.begin().await.unwrap();
        let outcome = async {
            UserRepository::create(uow.session(), &user_data("Frank", "PM"))?;
            uow.flush().await?;
            UserRepository::get_one(uow.session(), &by_name("Nobody")).await
        }
        .await;
        let err = uow.exit(outcome).await.unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(committed_users(&factory).await, 0);
    }

    #[tokio::test]
    async fn scope_closure_commits_on_ok() {
        let factory = setup().await;

        let id = factory
            .scope(|session| {
                Box::pin(async move {
                    let grace = UserRepository::create(session, &user_data("Grace", "CTO"))?;
                    session.flush().await?;
                    Ok::<_, RepoError>(id_of(&grace))
                })
            })
            .await
            .unwrap();

        assert!(id > 0);
        assert_eq!(committed_users(&factory).await, 1);
    }

    #[tokio::test]
    async fn scope_closure_rolls_back_on_caller_error() {
        let factory = setup().await;

        let result: anyhow::Result<()> = factory
            .scope(|session| {
                Box::pin(async move {
                    UserRepository::create(session, &user_data("Heidi", "CFO"))?;
                    session.flush().await?;
                    anyhow::bail!("business rule violated")
                })
            })
            .await;

        assert_eq!(result.unwrap_err().to_string(), "business rule violated");
        assert_eq!(committed_users(&factory).await, 0);
    }

    #[tokio::test]
    async fn dropping_an_open_scope_rolls_back() {
        let factory = setup().await;

        let uow = factory.begin().await.unwrap();
        let ivan = UserRepository::create(uow.session(), &user_data("Ivan", "Dev")).unwrap();
        uow.flush().await.unwrap();
        drop(uow);

        assert_eq!(ivan.state(), InstanceState::Transient);
        assert_eq!(committed_users(&factory).await, 0);
    }

    #[tokio::test]
    async fn cancelled_task_rolls_back() {
        let factory = setup().await;

        let result = tokio::time::timeout(Duration::from_millis(50), async {
            let uow = factory.begin().await?;
            UserRepository::create(uow.session(), &user_data("Judy", "Dev"))?;
            uow.flush().await?;
            std::future::pending::<()>().await;
            uow.commit().await
        })
        .await;

        assert!(result.is_err(), "scope should have been cancelled");
        assert_eq!(committed_users(&factory).await, 0);
    }

    #[tokio::test]
    async fn failed_flush_poisons_the_session() {
        let factory = setup().await;
        seed(&factory, &["Mallory"], "Dev").await;

        let uow = factory.begin().await.unwrap();
        UserRepository::create(uow.session(), &user_data("Mallory", "Dev")).unwrap();
        let err = uow.flush().await.unwrap_err();
        assert_eq!(err.tx_kind(), Some(TxErrorKind::UniqueViolation));
        assert!(uow.session().is_failed());

        let read = UserRepository::get_one(uow.session(), &by_name("Mallory")).await;
        assert!(matches!(read, Err(RepoError::SessionFailed { .. })));

        let commit = uow.commit().await;
        assert!(matches!(commit, Err(RepoError::SessionFailed { .. })));
        assert_eq!(committed_users(&factory).await, 1);
    }

    #[tokio::test]
    async fn unique_violation_on_commit_is_classified_and_rolled_back() {
        let factory = setup().await;
        seed(&factory, &["Oscar"], "Dev").await;

        let uow = factory.begin().await.unwrap();
        UserRepository::create(uow.session(), &user_data("Peggy", "Dev")).unwrap();
        UserRepository::create(uow.session(), &user_data("Oscar", "Dev")).unwrap();
        let err = uow.commit().await.unwrap_err();

        assert!(matches!(
            err,
            RepoError::Transaction(TransactionError {
                stage: TxStage::Flush,
                kind: TxErrorKind::UniqueViolation,
                ..
            })
        ));
        assert_eq!(committed_users(&factory).await, 1);
    }

    #[tokio::test]
    async fn deferred_constraint_fails_at_commit() {
        let factory = setup().await;

        let uow = factory.begin().await.unwrap();
        let note = NoteRepository::create(
            uow.session(),
            &FieldMap::new().with("user_id", 4242).with("body", "orphan"),
        )
        .unwrap();
        uow.flush().await.unwrap();
        let err = uow.commit().await.unwrap_err();

        assert!(matches!(
            err,
            RepoError::Transaction(TransactionError {
                stage: TxStage::Commit,
                kind: TxErrorKind::ForeignKeyViolation,
                ..
            })
        ));
        assert_eq!(note.state(), InstanceState::Transient);

        // The queued rollback has run before the pooled connection serves the next scope.
        let uow = factory.begin().await.unwrap();
        UserRepository::create(uow.session(), &user_data("Quinn", "Dev")).unwrap();
        uow.commit().await.unwrap();
        assert_eq!(committed_users(&factory).await, 1);
    }

    #[tokio::test]
    async fn sessions_get_distinct_ids_and_close_after_exit() {
        let factory = setup().await;

        let first = factory.begin().await.unwrap();
        let first_id = first.session().id();
        first.rollback().await.unwrap();

        let second = factory.begin().await.unwrap();
        assert_ne!(second.session().id(), first_id);
        second.commit().await.unwrap();
    }
}
