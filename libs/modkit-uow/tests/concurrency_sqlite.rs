#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Several scopes at once over a file-backed database.

#[cfg(feature = "sqlite")]
mod common;

#[cfg(feature = "sqlite")]
mod sqlite_concurrency_tests {
    use modkit_uow::{CreateMixin, FieldMap, ReadMixin, RepoError};

    use crate::common::{UserRepository, by_name, committed_users, seed, setup_file, user_data};

    #[tokio::test]
    async fn concurrent_scopes_are_isolated() {
        let (factory, _dir) = setup_file(2).await;
        seed(&factory, &["Alice", "Bob"], "Engineer").await;

        let read = |name: &'static str| {
            let factory = factory.clone();
            async move {
                let uow = factory.begin().await?;
                let id = uow.session().id();
                let found = UserRepository::get_one(uow.session(), &by_name(name)).await?;
                uow.commit().await?;
                Ok::<_, RepoError>((id, found))
            }
        };
        let (a, b) = tokio::join!(read("Alice"), read("Bob"));
        let (id_a, alice) = a.unwrap();
        let (id_b, bob) = b.unwrap();

        assert_ne!(id_a, id_b);
        assert!(!alice.ptr_eq(&bob));
        assert_eq!(alice.model().unwrap().name, "Alice");
        assert_eq!(bob.model().unwrap().name, "Bob");
    }

    #[tokio::test]
    async fn spawned_writers_each_commit_their_own_rows() {
        let (factory, _dir) = setup_file(2).await;

        let mut handles = Vec::new();
        for worker in 0..4 {
            let factory = factory.clone();
            handles.push(tokio::spawn(async move {
                let uow = factory.begin().await?;
                UserRepository::create(
                    uow.session(),
                    &user_data(&format!("worker-{worker}"), "Batch"),
                )?;
                uow.commit().await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(committed_users(&factory).await, 4);
        let uow = factory.begin().await.unwrap();
        let batch = UserRepository::count(uow.session(), &FieldMap::new().with("position", "Batch"))
            .await
            .unwrap();
        assert_eq!(batch, 4);
        uow.commit().await.unwrap();
    }

    #[tokio::test]
    async fn uncommitted_rows_are_invisible_to_other_scopes() {
        let (factory, _dir) = setup_file(2).await;

        let writer = factory.begin().await.unwrap();
        UserRepository::create(writer.session(), &user_data("Carol", "Ops")).unwrap();
        writer.flush().await.unwrap();

        assert_eq!(committed_users(&factory).await, 0);
        writer.commit().await.unwrap();
        assert_eq!(committed_users(&factory).await, 1);
    }
}
