use tessera::{
    Database, Result, SessionKind, TesseraError, TransactionOptions, TransactionType, ValueType,
};

fn options() -> TransactionOptions {
    TransactionOptions::default()
}

#[test]
fn read_transaction_cannot_commit() -> Result<()> {
    let db = Database::open("reads")?;
    let session = db.session(SessionKind::Data);
    let tx = session.transaction(TransactionType::Read, options())?;
    let err = tx.commit().unwrap_err();
    assert_eq!(err.code(), "ILLEGAL_COMMIT");
    Ok(())
}

#[test]
fn commit_is_one_shot() -> Result<()> {
    let db = Database::open("one_shot")?;
    let session = db.session(SessionKind::Schema);
    let tx = session.transaction(TransactionType::Write, options())?;
    tx.types()?.put_entity_type("person")?;
    tx.commit()?;
    let err = tx.commit().unwrap_err();
    assert_eq!(err.code(), "TRANSACTION_CLOSED");
    Ok(())
}

#[test]
fn closed_transaction_rejects_every_operation() -> Result<()> {
    let db = Database::open("closed")?;
    let session = db.session(SessionKind::Data);
    let tx = session.transaction(TransactionType::Read, options())?;
    let storage = tx.storage()?.clone();
    let mut iterator = storage.iterate(&[0x01])?;

    tx.close();
    tx.close(); // idempotent

    assert_eq!(tx.storage().err().map(|e| e.code()), Some("TRANSACTION_CLOSED"));
    assert_eq!(tx.types().err().map(|e| e.code()), Some("TRANSACTION_CLOSED"));
    assert_eq!(tx.data().err().map(|e| e.code()), Some("TRANSACTION_CLOSED"));
    assert_eq!(storage.get(&[0x01]).unwrap_err().code(), "TRANSACTION_CLOSED");
    assert_eq!(
        storage.get_last(&[0x01]).unwrap_err().code(),
        "TRANSACTION_CLOSED"
    );
    assert_eq!(
        storage.iterate(&[0x01]).err().map(|e| e.code()),
        Some("TRANSACTION_CLOSED")
    );
    let failed = iterator.next().expect("closed iterator yields an error");
    assert_eq!(failed.unwrap_err().code(), "TRANSACTION_CLOSED");
    Ok(())
}

#[test]
fn rollback_leaves_the_transaction_open_for_reads() -> Result<()> {
    let db = Database::open("rollback")?;
    {
        let session = db.session(SessionKind::Schema);
        let tx = session.transaction(TransactionType::Write, options())?;
        tx.types()?.put_entity_type("person")?;
        tx.commit()?;
    }
    let session = db.session(SessionKind::Schema);
    let tx = session.transaction(TransactionType::Write, options())?;
    tx.types()?.put_entity_type("vehicle")?;
    tx.rollback()?;
    assert!(tx.is_open());
    assert!(tx.types()?.get_type("vehicle")?.is_none());
    assert!(tx.types()?.get_type("person")?.is_some());
    tx.close();
    Ok(())
}

#[test]
fn schema_transaction_may_not_modify_data() -> Result<()> {
    let db = Database::open("schema_writes_data")?;
    {
        let session = db.session(SessionKind::Schema);
        let tx = session.transaction(TransactionType::Write, options())?;
        tx.types()?.put_entity_type("person")?;
        tx.commit()?;
    }
    let session = db.session(SessionKind::Schema);
    let tx = session.transaction(TransactionType::Write, options())?;
    let person = tx.types()?.get_type("person")?.expect("committed");
    tx.data()?.create_entity(person.vertex())?;
    let err = tx.commit().unwrap_err();
    assert_eq!(err.code(), "SESSION_SCHEMA_VIOLATION");
    Ok(())
}

#[test]
fn data_transaction_may_not_modify_schema() -> Result<()> {
    let db = Database::open("data_writes_schema")?;
    let session = db.session(SessionKind::Data);
    let tx = session.transaction(TransactionType::Write, options())?;
    let err = tx.types()?.put_entity_type("vehicle").unwrap_err();
    assert_eq!(err.code(), "SESSION_DATA_VIOLATION");
    tx.close();
    Ok(())
}

#[test]
fn session_close_closes_live_transactions() -> Result<()> {
    let db = Database::open("session_close")?;
    let session = db.session(SessionKind::Data);
    let tx = session.transaction(TransactionType::Read, options())?;
    session.close();
    assert!(!tx.is_open());
    assert_eq!(
        session
            .transaction(TransactionType::Read, options())
            .err()
            .map(|e| e.code()),
        Some("TRANSACTION_CLOSED")
    );
    Ok(())
}

#[test]
fn read_iterators_recycle_their_cursor() -> Result<()> {
    let db = Database::open("recycling")?;
    {
        let session = db.session(SessionKind::Schema);
        let tx = session.transaction(TransactionType::Write, options())?;
        let types = tx.types()?;
        types.put_attribute_type("name", ValueType::String)?;
        types.put_entity_type("person")?;
        tx.commit()?;
    }
    let session = db.session(SessionKind::Data);
    let tx = session.transaction(TransactionType::Read, options())?;
    let storage = tx.storage()?.clone();

    // Warm up: the first drained iterator seeds the pool.
    for entry in storage.iterate(&[0x01])? {
        entry?;
    }
    let before = db.engine().metrics().cursors_created;
    for _ in 0..1000 {
        let mut found = 0;
        for entry in storage.iterate(&[0x01])? {
            entry?;
            found += 1;
        }
        assert!(found > 0);
    }
    let after = db.engine().metrics().cursors_created;
    assert_eq!(after, before, "drained read iterators reuse pooled cursors");
    tx.close();
    Ok(())
}

#[test]
fn write_iterators_observe_the_write_buffer() -> Result<()> {
    let db = Database::open("write_view")?;
    {
        let session = db.session(SessionKind::Schema);
        let tx = session.transaction(TransactionType::Write, options())?;
        tx.types()?.put_entity_type("person")?;
        tx.commit()?;
    }
    let session = db.session(SessionKind::Data);
    let tx = session.transaction(TransactionType::Write, options())?;
    let types = tx.types()?;
    let person = types.get_type("person")?.expect("committed");
    let entity = tx.data()?.create_entity(person.vertex())?;
    tx.data()?.flush()?;
    let mut instances = Vec::new();
    for instance in types
        .get_type("person")?
        .expect("committed")
        .instances()
    {
        instances.push(instance?);
    }
    assert_eq!(instances, vec![entity]);
    tx.rollback()?;
    tx.close();
    Ok(())
}

#[test]
fn errors_carry_stable_codes() {
    assert_eq!(TesseraError::TransactionClosed.code(), "TRANSACTION_CLOSED");
    assert_eq!(TesseraError::IllegalCommit.code(), "ILLEGAL_COMMIT");
    assert_eq!(
        TesseraError::StorageFailure("conflict".to_string()).code(),
        "STORAGE_FAILURE"
    );
    assert_eq!(
        TesseraError::InvalidRootTypeMutation.code(),
        "INVALID_ROOT_TYPE_MUTATION"
    );
}
