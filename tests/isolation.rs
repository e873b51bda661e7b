use tessera::{
    Database, DatabaseOptions, Result, SessionKind, TransactionOptions, TransactionType,
};

fn options() -> TransactionOptions {
    TransactionOptions::default()
}

#[test]
fn data_snapshot_does_not_observe_later_schema_commits() -> Result<()> {
    let db = Database::open("schema_isolation")?;
    {
        let session = db.session(SessionKind::Schema);
        let tx = session.transaction(TransactionType::Write, options())?;
        tx.types()?.put_entity_type("person")?;
        tx.commit()?;
    }

    let data_session = db.session(SessionKind::Data);
    let tx1 = data_session.transaction(TransactionType::Write, options())?;

    {
        let session = db.session(SessionKind::Schema);
        let tx2 = session.transaction(TransactionType::Write, options())?;
        tx2.types()?.put_entity_type("vehicle")?;
        tx2.commit()?;
    }

    // tx1 pinned the schema cache built before the commit.
    assert!(tx1.types()?.get_type("vehicle")?.is_none());

    // Unrelated data writes still commit.
    let person = tx1.types()?.get_type("person")?.expect("committed");
    tx1.data()?.create_entity(person.vertex())?;
    tx1.commit()?;

    // A data transaction opened after the schema commit observes it.
    let tx3 = data_session.transaction(TransactionType::Read, options())?;
    assert!(tx3.types()?.get_type("vehicle")?.is_some());
    tx3.close();
    Ok(())
}

#[test]
fn schema_commit_rebuilds_the_cache_for_later_readers() -> Result<()> {
    let db = Database::open("cache_rebuild")?;
    let data_session = db.session(SessionKind::Data);

    let before = data_session.transaction(TransactionType::Read, options())?;
    assert!(before.types()?.get_type("vehicle")?.is_none());

    let schema_session = db.session(SessionKind::Schema);
    let tx = schema_session.transaction(TransactionType::Write, options())?;
    tx.types()?.put_entity_type("vehicle")?;
    tx.commit()?;

    // The long-lived reader keeps its snapshot.
    assert!(before.types()?.get_type("vehicle")?.is_none());
    before.close();

    let after = data_session.transaction(TransactionType::Read, options())?;
    assert!(after.types()?.get_type("vehicle")?.is_some());
    after.close();
    Ok(())
}

#[test]
fn cached_schema_storage_refreshes_every_n_data_commits() -> Result<()> {
    let db = Database::open_with(
        "refresh",
        DatabaseOptions {
            schema_refresh_rate: 2,
            ..DatabaseOptions::default()
        },
    )?;
    {
        let session = db.session(SessionKind::Schema);
        let tx = session.transaction(TransactionType::Write, options())?;
        tx.types()?.put_entity_type("person")?;
        tx.commit()?;
    }

    let session = db.session(SessionKind::Data);
    let before = db.engine().metrics().transactions_begun;

    // First commit: engine transactions for the data tx and the cache build.
    let tx = session.transaction(TransactionType::Write, options())?;
    let person = tx.types()?.get_type("person")?.expect("committed");
    tx.data()?.create_entity(person.vertex())?;
    tx.commit()?;

    // Second commit reuses the cache and trips the refresh.
    let tx = session.transaction(TransactionType::Write, options())?;
    let person = tx.types()?.get_type("person")?.expect("committed");
    tx.data()?.create_entity(person.vertex())?;
    tx.commit()?;

    let after = db.engine().metrics().transactions_begun;
    assert_eq!(
        after - before,
        4,
        "two data transactions, one cache build, one refresh"
    );
    Ok(())
}

#[test]
fn within_transaction_writes_are_visible_to_reads() -> Result<()> {
    let db = Database::open("own_writes")?;
    {
        let session = db.session(SessionKind::Schema);
        let tx = session.transaction(TransactionType::Write, options())?;
        tx.types()?.put_entity_type("person")?;
        tx.commit()?;
    }
    let session = db.session(SessionKind::Data);
    let tx = session.transaction(TransactionType::Write, options())?;
    let person = tx.types()?.get_type("person")?.expect("committed");
    let entity = tx.data()?.create_entity(person.vertex())?;
    let mut instances = Vec::new();
    for instance in person.instances() {
        instances.push(instance?);
    }
    assert_eq!(instances, vec![entity]);
    tx.rollback()?;
    tx.close();
    Ok(())
}
