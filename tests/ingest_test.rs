mod common;

use anyhow::Result;
use common::{bank, erp, parse_date, stored_balances, test_service, IP1_INN, OOO_INN};
use ledgerbridge::domain::{Method, Operation, Organization, Source};
use ledgerbridge::ingest::{BankRecord, DocumentKind, OrganizationDirectory, RawRecord};
use ledgerbridge::storage::TransactionQuery;
use serde_json::json;

#[tokio::test]
async fn test_repeated_ingestion_is_idempotent() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let batch = vec![
        bank("r-1", "100.00", "2024-01-02", OOO_INN),
        bank("r-2", "-30.00", "2024-01-03", OOO_INN),
        erp("doc-1", 1, DocumentKind::Receipt, "ООО", "12.50", "2024-01-03"),
    ];

    let first = service.ingest(batch.clone()).await?;
    assert_eq!(first.received, 3);
    assert_eq!(first.inserted, 3);
    assert_eq!(first.duplicates, 0);
    assert_eq!(first.touched, vec![Organization::Ooo]);
    service.recompute_balances().await?;
    let balances = stored_balances(&service, Organization::Ooo).await?;

    let second = service.ingest(batch).await?;
    assert_eq!(second.inserted, 0);
    assert_eq!(second.duplicates, 3);
    assert!(second.touched.is_empty());

    service.recompute_balances().await?;
    assert_eq!(service.repository().count_transactions().await?, 3);
    assert_eq!(stored_balances(&service, Organization::Ooo).await?, balances);

    Ok(())
}

#[tokio::test]
async fn test_invalid_records_are_rejected_and_counted() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let RawRecord::Erp(mut draft) = erp("draft", 1, DocumentKind::Issue, "ООО", "1", "2024-01-02")
    else {
        unreachable!()
    };
    draft.posted = false;

    let report = service
        .ingest(vec![
            bank("ok-1", "15.00", "2024-01-02", OOO_INN),
            bank("zero", "0", "2024-01-02", OOO_INN),
            bank("bad-date", "1.00", "2024/01/02", OOO_INN),
            bank("bad-amount", "1.005", "2024-01-02", OOO_INN),
            bank("stranger", "1.00", "2024-01-02", "0000000000"),
            RawRecord::Bank(BankRecord {
                amount: Some(json!(5)),
                date: Some("2024-01-02".into()),
                inn: Some(json!(OOO_INN)),
                ..Default::default()
            }),
            RawRecord::Erp(draft),
        ])
        .await?;

    assert_eq!(report.received, 7);
    assert_eq!(report.inserted, 1);
    assert_eq!(report.rejected.len(), 6);

    let reasons: Vec<&str> = report.rejected.iter().map(|r| r.reason.as_str()).collect();
    assert!(reasons.contains(&"amount is zero"));
    assert!(reasons.contains(&"record has no id"));
    assert!(reasons.contains(&"unknown organization '0000000000'"));
    assert!(reasons.iter().any(|r| r.starts_with("unparseable date")));
    assert!(reasons.iter().any(|r| r.starts_with("unparseable amount")));
    assert!(reasons.contains(&"document draft is not posted"));

    let stranger = report
        .rejected
        .iter()
        .find(|r| r.reference.as_deref() == Some("stranger"))
        .unwrap();
    assert_eq!(stranger.source, Source::Bank);

    Ok(())
}

#[tokio::test]
async fn test_same_id_from_different_sources_are_distinct() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let report = service
        .ingest(vec![
            bank("doc-1_1", "10.00", "2024-01-02", OOO_INN),
            erp("doc-1", 1, DocumentKind::Receipt, "ООО", "10.00", "2024-01-02"),
        ])
        .await?;

    assert_eq!(report.inserted, 2);
    assert_eq!(service.repository().count_transactions().await?, 2);

    Ok(())
}

#[tokio::test]
async fn test_normalized_fields_are_stored() -> Result<()> {
    let (service, _temp) = test_service().await?;

    service
        .ingest(vec![
            RawRecord::Bank(BankRecord {
                id: Some(json!(9001)),
                amount: Some(json!("-1 250,75")),
                date: Some("05.02.2024 14:30:00".into()),
                inn: Some(json!(IP1_INN)),
                payment_type: Some("Оплата по QR".into()),
                counterparty: Some("Supplier".into()),
                purpose: Some("Invoice 17".into()),
            }),
            erp("doc-9", 3, DocumentKind::Receipt, "ИП1", "-2", "2024-02-05T09:00:00"),
        ])
        .await?;

    let transactions = service
        .list_transactions(&TransactionQuery {
            organization: Some(Organization::Ip1),
            ..Default::default()
        })
        .await?;
    assert_eq!(transactions.len(), 2);

    let payment = transactions.iter().find(|t| t.source == Source::Bank).unwrap();
    assert_eq!(payment.external_id, "9001");
    assert_eq!(payment.operation, Operation::Expense);
    assert_eq!(payment.method, Method::Qr);
    assert_eq!(payment.amount_cents, 125075);
    assert_eq!(payment.date, parse_date("2024-02-05"));
    assert_eq!(payment.counterparty.as_deref(), Some("Supplier"));
    assert_eq!(payment.purpose.as_deref(), Some("Invoice 17"));

    // Negative receipt line is a correction: goods went out
    let correction = transactions.iter().find(|t| t.source == Source::Erp).unwrap();
    assert_eq!(correction.external_id, "doc-9_3");
    assert_eq!(correction.operation, Operation::Expense);
    assert_eq!(correction.method, Method::Purchase);
    assert_eq!(correction.amount_cents, 200);
    assert_eq!(correction.item.as_deref(), Some("Flour"));

    Ok(())
}

#[tokio::test]
async fn test_list_transactions_filters() -> Result<()> {
    let (service, _temp) = test_service().await?;

    service
        .ingest(vec![
            bank("f-1", "1.00", "2024-01-01", OOO_INN),
            bank("f-2", "2.00", "2024-01-05", OOO_INN),
            bank("f-3", "3.00", "2024-01-09", IP1_INN),
            erp("d", 1, DocumentKind::Issue, "ООО", "4.00", "2024-01-05"),
        ])
        .await?;

    let by_org = service
        .list_transactions(&TransactionQuery {
            organization: Some(Organization::Ooo),
            ..Default::default()
        })
        .await?;
    assert_eq!(by_org.len(), 3);
    assert!(by_org.windows(2).all(|w| w[0].date <= w[1].date));

    let by_source = service
        .list_transactions(&TransactionQuery {
            source: Some(Source::Erp),
            ..Default::default()
        })
        .await?;
    assert_eq!(by_source.len(), 1);

    let by_range = service
        .list_transactions(&TransactionQuery {
            from_date: Some(parse_date("2024-01-02")),
            to_date: Some(parse_date("2024-01-05")),
            ..Default::default()
        })
        .await?;
    assert_eq!(by_range.len(), 2);

    let limited = service
        .list_transactions(&TransactionQuery {
            limit: Some(1),
            ..Default::default()
        })
        .await?;
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].external_id, "f-1");

    Ok(())
}

#[tokio::test]
async fn test_custom_directory() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let service = service.with_directory(OrganizationDirectory::parse("777=IP3").map_err(anyhow::Error::msg)?);

    let report = service
        .ingest(vec![
            bank("c-1", "1.00", "2024-01-01", "777"),
            bank("c-2", "1.00", "2024-01-01", OOO_INN),
        ])
        .await?;

    assert_eq!(report.inserted, 1);
    assert_eq!(report.touched, vec![Organization::Ip3]);
    assert_eq!(report.rejected.len(), 1);

    Ok(())
}
