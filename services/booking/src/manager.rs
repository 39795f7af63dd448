//! Booking consistency rules.
//!
//! `BookingManager` owns every state transition of a booking and the two
//! denormalized counters that depend on it: the member's session balance and
//! the class's enrolled count. Steps are issued one after another against the
//! store; the store is the only arbiter of state, so each conditional write is
//! checked and the rare partial failure is either compensated or left for
//! `reconcile_enrollment` to repair.

use std::future::Future;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use uuid::Uuid;

use gymflow_common::{
    retry_with_backoff, AppError, Booking, BookingStatus, ClassGender, ClassStatus, Gender, GymClass, Member,
    MemberStatus, NewClass, NewMember,
};

use crate::config::BookingSettings;
use crate::models::{BookingError, CancelledBy, ReconcileSummary};
use crate::notifications::{dispatch_in_background, BookingEvent, BookingEventType, NotificationDispatcher};
use crate::store::{BookingStore, ClassCatalog, MemberDirectory};

#[derive(Clone)]
pub struct BookingManager {
    members: Arc<dyn MemberDirectory>,
    classes: Arc<dyn ClassCatalog>,
    bookings: Arc<dyn BookingStore>,
    notifier: Arc<dyn NotificationDispatcher>,
    settings: BookingSettings,
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Women-only classes turn away male members. `Male` and `All` classes admit everyone.
fn check_eligibility(member: &Member, class: &GymClass) -> Result<(), BookingError> {
    if class.gender == ClassGender::Female && member.gender == Some(Gender::Male) {
        return Err(BookingError::EligibilityViolation {
            class_id: class.id,
            restriction: ClassGender::Female,
        });
    }
    Ok(())
}

impl BookingManager {
    pub fn new(
        members: Arc<dyn MemberDirectory>,
        classes: Arc<dyn ClassCatalog>,
        bookings: Arc<dyn BookingStore>,
        notifier: Arc<dyn NotificationDispatcher>,
        settings: BookingSettings,
    ) -> Self {
        Self {
            members,
            classes,
            bookings,
            notifier,
            settings,
        }
    }

    // Booking lifecycle

    pub async fn create_booking(&self, member_id: Uuid, class_id: Uuid) -> Result<Booking, BookingError> {
        let member = self
            .guarded(self.members.get_member(member_id))
            .await?
            .ok_or(BookingError::MemberNotFound(member_id))?;

        if member.status != MemberStatus::Active {
            return Err(BookingError::MemberInactive(member_id));
        }
        if member.remaining_sessions <= 0 {
            return Err(BookingError::InsufficientBalance(member_id));
        }

        let class = self
            .guarded(self.classes.get_class(class_id))
            .await?
            .ok_or(BookingError::ClassNotFound(class_id))?;

        if class.status != ClassStatus::Active || class.schedule < today() {
            return Err(BookingError::ClassUnavailable(class_id));
        }

        check_eligibility(&member, &class)?;

        if self.guarded(self.bookings.find_confirmed(member_id, class_id)).await?.is_some() {
            return Err(BookingError::AlreadyBooked { member_id, class_id });
        }
        if !class.has_free_seat() {
            return Err(BookingError::ClassFull(class_id));
        }

        let booking = self
            .guarded(self.bookings.insert_booking(member_id, class_id))
            .await
            .map_err(|err| match err {
                AppError::Conflict(_) => BookingError::AlreadyBooked { member_id, class_id },
                other => BookingError::Store(other),
            })?;

        // The seat is taken strictly after the insert succeeded.
        let seat_taken = match self.guarded(self.classes.try_reserve_seat(class_id)).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::info!(
                    "Class {} filled up while booking {} was being created; discarding it",
                    class_id, booking.id
                );
                self.discard_booking(&booking, false).await?;
                return Err(BookingError::ClassFull(class_id));
            }
            Err(err) => {
                tracing::error!(
                    "Booking {} confirmed but enrolled count of class {} was not incremented: {}",
                    booking.id, class_id, err
                );
                false
            }
        };

        if self.settings.consumes_session {
            match self.guarded(self.members.update_remaining_sessions(member_id, -1)).await {
                Ok(Some(balance)) => {
                    tracing::debug!("Member {} has {} session(s) left", member_id, balance);
                }
                Ok(None) => {
                    tracing::info!(
                        "Member {} ran out of sessions while booking {} was being created; discarding it",
                        member_id, booking.id
                    );
                    self.discard_booking(&booking, seat_taken).await?;
                    return Err(BookingError::InsufficientBalance(member_id));
                }
                Err(err) => {
                    tracing::error!(
                        "Booking {} confirmed but no session was deducted from member {}: {}",
                        booking.id, member_id, err
                    );
                }
            }
        }

        tracing::info!("Booking {} confirmed: member {} in class {}", booking.id, member_id, class_id);
        self.notify(BookingEventType::BookingCreated, &booking);

        Ok(booking)
    }

    pub async fn cancel_booking(&self, booking_id: Uuid, cancelled_by: CancelledBy) -> Result<(), BookingError> {
        let booking = self
            .guarded(self.bookings.get_booking(booking_id))
            .await?
            .ok_or(BookingError::NotFound(booking_id))?;

        if booking.status == BookingStatus::Cancelled {
            tracing::debug!("Booking {} already cancelled", booking_id);
            return Ok(());
        }

        if cancelled_by == CancelledBy::Member && self.settings.cancellation_cutoff_hours > 0 {
            if let Some(class) = self.guarded(self.classes.get_class(booking.class_id)).await? {
                let cutoff = Duration::hours(self.settings.cancellation_cutoff_hours);
                if class.starts_at() - Utc::now() < cutoff {
                    return Err(BookingError::CancellationWindowClosed {
                        booking_id,
                        cutoff_hours: self.settings.cancellation_cutoff_hours,
                    });
                }
            }
        }

        if !self.guarded(self.bookings.mark_cancelled(booking_id)).await? {
            tracing::debug!("Booking {} was cancelled concurrently", booking_id);
            return Ok(());
        }

        match self.guarded(self.classes.update_enrolled(booking.class_id, -1)).await {
            Ok(Some(enrolled)) => {
                tracing::debug!("Class {} now has {} enrolled", booking.class_id, enrolled);
            }
            Ok(None) => {
                tracing::warn!("Class {} of cancelled booking {} no longer exists", booking.class_id, booking_id);
            }
            Err(err) => {
                tracing::error!(
                    "Booking {} cancelled but enrolled count of class {} was not decremented: {}",
                    booking_id, booking.class_id, err
                );
            }
        }

        if self.settings.consumes_session {
            match self.guarded(self.members.update_remaining_sessions(booking.user_id, 1)).await {
                Ok(Some(balance)) => {
                    tracing::debug!("Member {} has {} session(s) left", booking.user_id, balance);
                }
                Ok(None) => {
                    tracing::warn!("Member {} of cancelled booking {} no longer exists", booking.user_id, booking_id);
                }
                Err(err) => {
                    tracing::error!(
                        "Booking {} cancelled but the session was not restored to member {}: {}",
                        booking_id, booking.user_id, err
                    );
                }
            }
        }

        tracing::info!("Booking {} cancelled by {:?}", booking_id, cancelled_by);
        let cancelled = Booking {
            status: BookingStatus::Cancelled,
            ..booking
        };
        self.notify(BookingEventType::BookingCancelled, &cancelled);

        Ok(())
    }

    /// Hard-deletes a cancelled booking.
    ///
    /// Each attempt deletes by id and confirms the row is gone. Failed attempts
    /// are retried with linear backoff. When every attempt fails, the cancelled
    /// rows of the same member and class are deleted instead and the store is
    /// queried once more; the call fails only if such rows are still there.
    pub async fn delete_booking(&self, booking_id: Uuid) -> Result<(), BookingError> {
        let booking = match self.guarded(self.bookings.get_booking(booking_id)).await? {
            Some(booking) => booking,
            None => {
                tracing::debug!("Booking {} already deleted", booking_id);
                return Ok(());
            }
        };

        if booking.is_confirmed() {
            return Err(BookingError::InvalidState {
                booking_id,
                status: booking.status,
            });
        }

        let by_id = retry_with_backoff(&self.settings.delete_retry, "Delete booking", |attempt| {
            self.delete_and_verify(booking_id, attempt)
        })
        .await;

        if let Err(err) = by_id {
            tracing::warn!(
                "Falling back to deleting cancelled bookings of member {} in class {}: {}",
                booking.user_id, booking.class_id, err
            );

            match self
                .guarded(self.bookings.delete_cancelled_for(booking.user_id, booking.class_id))
                .await
            {
                Ok(removed) => tracing::debug!("Fallback delete removed {} row(s)", removed),
                Err(err) => tracing::warn!("Fallback delete for booking {} failed: {}", booking_id, err),
            }

            let remaining = self
                .guarded(self.bookings.count_cancelled_for(booking.user_id, booking.class_id))
                .await?;
            if remaining > 0 {
                tracing::error!("Booking {} still present after fallback delete", booking_id);
                return Err(BookingError::DeleteUnverified { booking_id, remaining });
            }
        }

        tracing::info!("Booking {} deleted", booking_id);
        self.notify(BookingEventType::BookingDeleted, &booking);

        Ok(())
    }

    async fn delete_and_verify(&self, booking_id: Uuid, attempt: u32) -> Result<(), AppError> {
        self.guarded(self.bookings.delete_booking(booking_id)).await?;

        match self.guarded(self.bookings.get_booking(booking_id)).await? {
            None => Ok(()),
            Some(_) => Err(AppError::Internal(format!(
                "booking {} still present after delete attempt {}",
                booking_id, attempt
            ))),
        }
    }

    /// Bounds a store call by the configured store timeout.
    async fn guarded<T>(&self, operation: impl Future<Output = Result<T, AppError>>) -> Result<T, AppError> {
        let timeout = self.settings.store_timeout();
        tokio::time::timeout(timeout, operation)
            .await
            .map_err(|_| AppError::Timeout(format!("store call exceeded {:?}", timeout)))?
    }

    /// Rolls back a booking that lost a race after its insert.
    ///
    /// The row is deleted with the same retry as `delete_booking`. If that
    /// keeps failing the booking is cancelled instead, so no confirmed row
    /// outlives the rollback. The seat is only released once one of the two
    /// succeeded; otherwise the store error is returned.
    async fn discard_booking(&self, booking: &Booking, release_seat: bool) -> Result<(), BookingError> {
        let deleted = retry_with_backoff(&self.settings.delete_retry, "Discard booking", |attempt| {
            self.delete_and_verify(booking.id, attempt)
        })
        .await;

        if let Err(err) = deleted {
            tracing::warn!("Could not delete booking {}, cancelling it instead: {}", booking.id, err);
            if let Err(err) = self.guarded(self.bookings.mark_cancelled(booking.id)).await {
                tracing::error!(
                    "Booking {} may still be confirmed after a failed rollback; seat in class {} kept: {}",
                    booking.id, booking.class_id, err
                );
                return Err(BookingError::Store(err));
            }
        }

        if release_seat {
            if let Err(err) = self.guarded(self.classes.update_enrolled(booking.class_id, -1)).await {
                tracing::error!("Failed to release seat in class {}: {}", booking.class_id, err);
            }
        }
        Ok(())
    }

    pub async fn record_attendance(&self, booking_id: Uuid, attended: bool) -> Result<Booking, BookingError> {
        if let Some(booking) = self.guarded(self.bookings.set_attendance(booking_id, attended)).await? {
            tracing::info!("Attendance for booking {} set to {}", booking_id, attended);
            return Ok(booking);
        }

        match self.guarded(self.bookings.get_booking(booking_id)).await? {
            Some(booking) => Err(BookingError::InvalidState {
                booking_id,
                status: booking.status,
            }),
            None => Err(BookingError::NotFound(booking_id)),
        }
    }

    // Enrollment reconciliation

    /// Rewrites the class's enrolled count from its confirmed bookings. Returns the corrected count.
    pub async fn reconcile_enrollment(&self, class_id: Uuid) -> Result<i32, BookingError> {
        let class = self
            .guarded(self.classes.get_class(class_id))
            .await?
            .ok_or(BookingError::ClassNotFound(class_id))?;

        let (enrolled, _) = self.reconcile_class(&class).await?;
        Ok(enrolled)
    }

    /// Reconciles every active class scheduled on or after `after`.
    pub async fn reconcile_upcoming(&self, after: NaiveDate) -> Result<ReconcileSummary, BookingError> {
        let classes = self.guarded(self.classes.list_active(after)).await?;
        let mut summary = ReconcileSummary::default();

        for class in &classes {
            summary.classes_checked += 1;
            match self.reconcile_class(class).await {
                Ok((_, true)) => summary.classes_repaired += 1,
                Ok((_, false)) => {}
                Err(err) => {
                    summary.classes_failed += 1;
                    tracing::error!("Reconciliation of class {} failed: {}", class.id, err);
                }
            }
        }

        tracing::info!(
            "Reconciled {} class(es) from {}: {} repaired, {} failed",
            summary.classes_checked, after, summary.classes_repaired, summary.classes_failed
        );
        Ok(summary)
    }

    async fn reconcile_class(&self, class: &GymClass) -> Result<(i32, bool), BookingError> {
        let confirmed = self.guarded(self.bookings.count_confirmed_for_class(class.id)).await?;
        let confirmed = i32::try_from(confirmed)
            .map_err(|_| AppError::Internal(format!("confirmed count {} out of range", confirmed)))?;

        if confirmed == class.enrolled {
            return Ok((confirmed, false));
        }

        tracing::warn!(
            "Enrollment drift in class {}: stored {}, confirmed bookings {}",
            class.id, class.enrolled, confirmed
        );
        if !self.guarded(self.classes.set_enrolled(class.id, confirmed)).await? {
            return Err(BookingError::ClassNotFound(class.id));
        }

        Ok((confirmed, true))
    }

    // Balance

    /// Applies an approved balance request.
    pub async fn grant_sessions(&self, member_id: Uuid, sessions: i32) -> Result<i32, BookingError> {
        if sessions <= 0 {
            return Err(AppError::Validation("sessions must be positive".to_string()).into());
        }

        let balance = self
            .guarded(self.members.update_remaining_sessions(member_id, sessions))
            .await?
            .ok_or(BookingError::MemberNotFound(member_id))?;

        tracing::info!("Granted {} session(s) to member {} (balance {})", sessions, member_id, balance);
        Ok(balance)
    }

    // Directory and catalog access

    pub async fn create_member(&self, member: NewMember) -> Result<Member, BookingError> {
        Ok(self.guarded(self.members.create_member(member)).await?)
    }

    pub async fn get_member(&self, member_id: Uuid) -> Result<Member, BookingError> {
        self.guarded(self.members.get_member(member_id))
            .await?
            .ok_or(BookingError::MemberNotFound(member_id))
    }

    pub async fn find_member_by_email(&self, email: &str) -> Result<Member, BookingError> {
        self.guarded(self.members.get_member_by_email(email))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No member with email {}", email)).into())
    }

    pub async fn create_class(&self, class: NewClass) -> Result<GymClass, BookingError> {
        Ok(self.guarded(self.classes.create_class(class)).await?)
    }

    pub async fn get_class(&self, class_id: Uuid) -> Result<GymClass, BookingError> {
        self.guarded(self.classes.get_class(class_id))
            .await?
            .ok_or(BookingError::ClassNotFound(class_id))
    }

    pub async fn list_upcoming_classes(&self, after: Option<NaiveDate>) -> Result<Vec<GymClass>, BookingError> {
        Ok(self.guarded(self.classes.list_active(after.unwrap_or_else(today))).await?)
    }

    pub async fn get_booking(&self, booking_id: Uuid) -> Result<Booking, BookingError> {
        self.guarded(self.bookings.get_booking(booking_id))
            .await?
            .ok_or(BookingError::NotFound(booking_id))
    }

    pub async fn member_bookings(&self, member_id: Uuid) -> Result<Vec<Booking>, BookingError> {
        self.get_member(member_id).await?;
        Ok(self.guarded(self.bookings.list_for_member(member_id)).await?)
    }

    pub async fn class_bookings(&self, class_id: Uuid) -> Result<Vec<Booking>, BookingError> {
        self.get_class(class_id).await?;
        Ok(self.guarded(self.bookings.list_for_class(class_id)).await?)
    }

    fn notify(&self, event_type: BookingEventType, booking: &Booking) {
        dispatch_in_background(self.notifier.clone(), BookingEvent::new(event_type, booking));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use async_trait::async_trait;
    use chrono::NaiveTime;
    use gymflow_common::RetryPolicy;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDispatcher {
        events: Mutex<Vec<BookingEventType>>,
    }

    impl RecordingDispatcher {
        fn recorded(&self) -> Vec<BookingEventType> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationDispatcher for RecordingDispatcher {
        async fn emit(&self, event: &BookingEvent) -> Result<(), AppError> {
            self.events.lock().unwrap().push(event.event_type);
            Ok(())
        }
    }

    struct FailingDispatcher;

    #[async_trait]
    impl NotificationDispatcher for FailingDispatcher {
        async fn emit(&self, _event: &BookingEvent) -> Result<(), AppError> {
            Err(AppError::ExternalService("smtp unreachable".to_string()))
        }
    }

    struct Fixture {
        store: InMemoryStore,
        manager: BookingManager,
        events: Arc<RecordingDispatcher>,
    }

    fn test_settings() -> BookingSettings {
        BookingSettings {
            delete_retry: RetryPolicy::linear(3, 1),
            ..BookingSettings::default()
        }
    }

    fn fixture_with(settings: BookingSettings) -> Fixture {
        let store = InMemoryStore::new();
        let events = Arc::new(RecordingDispatcher::default());
        let manager = BookingManager::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            events.clone(),
            settings,
        );
        Fixture { store, manager, events }
    }

    fn fixture() -> Fixture {
        fixture_with(test_settings())
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    async fn add_member(store: &InMemoryStore, gender: Option<Gender>, sessions: i32) -> Member {
        let member = Member {
            id: Uuid::new_v4(),
            email: format!("{}@gymflow.test", Uuid::new_v4()),
            name: "Test Member".to_string(),
            gender,
            remaining_sessions: sessions,
            status: MemberStatus::Active,
            created_at: Utc::now(),
        };
        store.put_member(member.clone()).await;
        member
    }

    async fn add_class(store: &InMemoryStore, capacity: i32, enrolled: i32, gender: ClassGender) -> GymClass {
        add_class_on(store, today() + Duration::days(1), capacity, enrolled, gender).await
    }

    async fn add_class_on(
        store: &InMemoryStore,
        schedule: NaiveDate,
        capacity: i32,
        enrolled: i32,
        gender: ClassGender,
    ) -> GymClass {
        let class = GymClass {
            id: Uuid::new_v4(),
            name: "Circuit".to_string(),
            schedule,
            start_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
            capacity,
            enrolled,
            gender,
            trainers: vec!["Jo".to_string()],
            status: ClassStatus::Active,
            created_at: Utc::now(),
        };
        store.put_class(class.clone()).await;
        class
    }

    async fn enrolled(f: &Fixture, class_id: Uuid) -> i32 {
        f.manager.get_class(class_id).await.unwrap().enrolled
    }

    async fn balance(f: &Fixture, member_id: Uuid) -> i32 {
        f.manager.get_member(member_id).await.unwrap().remaining_sessions
    }

    #[tokio::test]
    async fn booking_takes_a_seat_and_a_session() {
        let f = fixture();
        let member = add_member(&f.store, Some(Gender::Female), 3).await;
        let class = add_class(&f.store, 10, 0, ClassGender::All).await;

        let booking = f.manager.create_booking(member.id, class.id).await.unwrap();
        settle().await;

        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.attendance, None);
        assert_eq!(enrolled(&f, class.id).await, 1);
        assert_eq!(balance(&f, member.id).await, 2);
        assert_eq!(f.events.recorded(), vec![BookingEventType::BookingCreated]);
    }

    #[tokio::test]
    async fn last_seat_goes_to_the_first_member() {
        let f = fixture();
        let first = add_member(&f.store, None, 5).await;
        let second = add_member(&f.store, None, 5).await;
        let class = add_class(&f.store, 1, 0, ClassGender::All).await;

        f.manager.create_booking(first.id, class.id).await.unwrap();
        assert_eq!(enrolled(&f, class.id).await, 1);

        let err = f.manager.create_booking(second.id, class.id).await.unwrap_err();
        assert!(matches!(err, BookingError::ClassFull(id) if id == class.id));
        assert_eq!(enrolled(&f, class.id).await, 1);
        assert_eq!(balance(&f, second.id).await, 5);
    }

    #[tokio::test]
    async fn zero_balance_is_rejected_before_any_write() {
        let f = fixture();
        let member = add_member(&f.store, None, 0).await;
        let class = add_class(&f.store, 10, 2, ClassGender::All).await;

        let err = f.manager.create_booking(member.id, class.id).await.unwrap_err();
        settle().await;

        assert!(matches!(err, BookingError::InsufficientBalance(_)));
        assert_eq!(f.store.booking_count().await, 0);
        assert_eq!(enrolled(&f, class.id).await, 2);
        assert!(f.events.recorded().is_empty());
    }

    #[tokio::test]
    async fn member_must_exist_and_be_active() {
        let f = fixture();
        let class = add_class(&f.store, 10, 0, ClassGender::All).await;

        let missing = f.manager.create_booking(Uuid::new_v4(), class.id).await.unwrap_err();
        assert!(matches!(missing, BookingError::MemberNotFound(_)));

        let mut member = add_member(&f.store, None, 4).await;
        member.status = MemberStatus::Inactive;
        f.store.put_member(member.clone()).await;

        let inactive = f.manager.create_booking(member.id, class.id).await.unwrap_err();
        assert!(matches!(inactive, BookingError::MemberInactive(_)));
    }

    #[tokio::test]
    async fn past_and_inactive_classes_cannot_be_booked() {
        let f = fixture();
        let member = add_member(&f.store, None, 4).await;

        let past = add_class_on(&f.store, today() - Duration::days(1), 10, 0, ClassGender::All).await;
        let err = f.manager.create_booking(member.id, past.id).await.unwrap_err();
        assert!(matches!(err, BookingError::ClassUnavailable(_)));

        let mut closed = add_class(&f.store, 10, 0, ClassGender::All).await;
        closed.status = ClassStatus::Inactive;
        f.store.put_class(closed.clone()).await;
        let err = f.manager.create_booking(member.id, closed.id).await.unwrap_err();
        assert!(matches!(err, BookingError::ClassUnavailable(_)));

        let todays = add_class_on(&f.store, today(), 10, 0, ClassGender::All).await;
        assert!(f.manager.create_booking(member.id, todays.id).await.is_ok());

        let err = f.manager.create_booking(member.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, BookingError::ClassNotFound(_)));
    }

    #[tokio::test]
    async fn only_women_only_classes_restrict_by_gender() {
        let f = fixture();

        for class_gender in [ClassGender::All, ClassGender::Male, ClassGender::Female] {
            for member_gender in [Some(Gender::Male), Some(Gender::Female), None] {
                let member = add_member(&f.store, member_gender, 2).await;
                let class = add_class(&f.store, 10, 0, class_gender).await;

                let result = f.manager.create_booking(member.id, class.id).await;
                let should_reject = class_gender == ClassGender::Female && member_gender == Some(Gender::Male);

                match result {
                    Err(BookingError::EligibilityViolation { restriction, .. }) => {
                        assert!(should_reject, "{:?} member rejected from {:?} class", member_gender, class_gender);
                        assert_eq!(restriction, ClassGender::Female);
                    }
                    Ok(_) => assert!(!should_reject, "{:?} member admitted to {:?} class", member_gender, class_gender),
                    Err(other) => panic!("unexpected error: {}", other),
                }
            }
        }
    }

    #[tokio::test]
    async fn a_cancelled_booking_does_not_block_rebooking() {
        let f = fixture();
        let member = add_member(&f.store, None, 5).await;
        let class = add_class(&f.store, 10, 0, ClassGender::All).await;

        let first = f.manager.create_booking(member.id, class.id).await.unwrap();
        let err = f.manager.create_booking(member.id, class.id).await.unwrap_err();
        assert!(matches!(err, BookingError::AlreadyBooked { .. }));

        f.manager.cancel_booking(first.id, CancelledBy::Member).await.unwrap();
        let second = f.manager.create_booking(member.id, class.id).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(enrolled(&f, class.id).await, 1);
        assert_eq!(balance(&f, member.id).await, 4);
    }

    #[tokio::test]
    async fn cancelling_releases_the_seat() {
        let f = fixture();
        let member = add_member(&f.store, None, 1).await;
        let class = add_class(&f.store, 10, 5, ClassGender::All).await;
        let booking = Booking {
            id: Uuid::new_v4(),
            user_id: member.id,
            class_id: class.id,
            status: BookingStatus::Confirmed,
            booking_date: Utc::now(),
            attendance: None,
        };
        f.store.put_booking(booking.clone()).await;

        f.manager.cancel_booking(booking.id, CancelledBy::Member).await.unwrap();
        settle().await;

        assert_eq!(f.manager.get_booking(booking.id).await.unwrap().status, BookingStatus::Cancelled);
        assert_eq!(enrolled(&f, class.id).await, 4);
        assert_eq!(balance(&f, member.id).await, 2);
        assert_eq!(f.events.recorded(), vec![BookingEventType::BookingCancelled]);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let f = fixture();
        let member = add_member(&f.store, None, 2).await;
        let class = add_class(&f.store, 10, 3, ClassGender::All).await;

        let booking = f.manager.create_booking(member.id, class.id).await.unwrap();
        assert_eq!(enrolled(&f, class.id).await, 4);

        f.manager.cancel_booking(booking.id, CancelledBy::Member).await.unwrap();
        f.manager.cancel_booking(booking.id, CancelledBy::Staff).await.unwrap();

        assert_eq!(enrolled(&f, class.id).await, 3);
        assert_eq!(balance(&f, member.id).await, 2);
        assert_eq!(f.manager.get_booking(booking.id).await.unwrap().status, BookingStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancelling_an_unknown_booking_is_not_found() {
        let f = fixture();
        let err = f.manager.cancel_booking(Uuid::new_v4(), CancelledBy::Staff).await.unwrap_err();
        assert!(matches!(err, BookingError::NotFound(_)));
    }

    #[tokio::test]
    async fn members_cannot_cancel_inside_the_cutoff_but_staff_can() {
        let f = fixture_with(BookingSettings {
            cancellation_cutoff_hours: 24,
            ..test_settings()
        });
        let member = add_member(&f.store, None, 2).await;
        let mut class = add_class_on(&f.store, today(), 10, 0, ClassGender::All).await;
        class.start_time = NaiveTime::from_hms_opt(23, 59, 0).unwrap();
        class.end_time = NaiveTime::from_hms_opt(23, 59, 59).unwrap();
        f.store.put_class(class.clone()).await;

        let booking = f.manager.create_booking(member.id, class.id).await.unwrap();

        let err = f.manager.cancel_booking(booking.id, CancelledBy::Member).await.unwrap_err();
        assert!(matches!(err, BookingError::CancellationWindowClosed { cutoff_hours: 24, .. }));
        assert_eq!(enrolled(&f, class.id).await, 1);

        f.manager.cancel_booking(booking.id, CancelledBy::Staff).await.unwrap();
        assert_eq!(enrolled(&f, class.id).await, 0);

        // Already cancelled: a member retry is still a no-op success.
        f.manager.cancel_booking(booking.id, CancelledBy::Member).await.unwrap();
    }

    #[tokio::test]
    async fn confirmed_bookings_cannot_be_deleted() {
        let f = fixture();
        let member = add_member(&f.store, None, 2).await;
        let class = add_class(&f.store, 10, 0, ClassGender::All).await;
        let booking = f.manager.create_booking(member.id, class.id).await.unwrap();

        let err = f.manager.delete_booking(booking.id).await.unwrap_err();

        assert!(matches!(err, BookingError::InvalidState { status: BookingStatus::Confirmed, .. }));
        assert!(f.manager.get_booking(booking.id).await.unwrap().is_confirmed());
        assert_eq!(enrolled(&f, class.id).await, 1);
        assert_eq!(balance(&f, member.id).await, 1);
    }

    #[tokio::test]
    async fn delete_survives_two_transient_failures() {
        let f = fixture();
        let member = add_member(&f.store, None, 2).await;
        let class = add_class(&f.store, 10, 0, ClassGender::All).await;
        let booking = f.manager.create_booking(member.id, class.id).await.unwrap();
        f.manager.cancel_booking(booking.id, CancelledBy::Staff).await.unwrap();

        f.store.fail_next_deletes(2);
        f.manager.delete_booking(booking.id).await.unwrap();

        assert_eq!(f.store.booking_count().await, 0);
        assert_eq!(enrolled(&f, class.id).await, 0);
        assert_eq!(balance(&f, member.id).await, 2);
    }

    #[tokio::test]
    async fn delete_falls_back_to_member_and_class_filter() {
        let f = fixture();
        let member = add_member(&f.store, None, 2).await;
        let class = add_class(&f.store, 10, 0, ClassGender::All).await;
        let booking = f.manager.create_booking(member.id, class.id).await.unwrap();
        f.manager.cancel_booking(booking.id, CancelledBy::Staff).await.unwrap();
        let rebooked = f.manager.create_booking(member.id, class.id).await.unwrap();

        f.store.ignore_deletes_by_id(true);
        f.manager.delete_booking(booking.id).await.unwrap();
        settle().await;

        assert!(matches!(f.manager.get_booking(booking.id).await, Err(BookingError::NotFound(_))));
        // The fallback only removes cancelled rows.
        assert!(f.manager.get_booking(rebooked.id).await.unwrap().is_confirmed());
        assert_eq!(f.events.recorded().last(), Some(&BookingEventType::BookingDeleted));
    }

    #[tokio::test]
    async fn deleting_a_missing_booking_is_a_no_op() {
        let f = fixture();
        assert!(f.manager.delete_booking(Uuid::new_v4()).await.is_ok());
    }

    #[tokio::test]
    async fn default_delete_policy_retries_three_times() {
        let retries = RetryPolicy::linear(BookingSettings::default().delete_retry.max_attempts, 1);
        let f = fixture_with(BookingSettings {
            delete_retry: retries,
            ..BookingSettings::default()
        });
        let member = add_member(&f.store, None, 2).await;
        let class = add_class(&f.store, 10, 0, ClassGender::All).await;
        let booking = f.manager.create_booking(member.id, class.id).await.unwrap();
        f.manager.cancel_booking(booking.id, CancelledBy::Staff).await.unwrap();

        // Only the delete by id can succeed here.
        f.store.ignore_fallback_deletes(true);
        f.store.fail_next_deletes(3);
        f.manager.delete_booking(booking.id).await.unwrap();

        assert_eq!(f.store.booking_count().await, 0);
    }

    #[tokio::test]
    async fn delete_is_unverified_when_the_fallback_leaves_rows() {
        let f = fixture();
        let member = add_member(&f.store, None, 2).await;
        let class = add_class(&f.store, 10, 0, ClassGender::All).await;
        let booking = f.manager.create_booking(member.id, class.id).await.unwrap();
        f.manager.cancel_booking(booking.id, CancelledBy::Staff).await.unwrap();

        f.store.ignore_deletes_by_id(true);
        f.store.ignore_fallback_deletes(true);
        let err = f.manager.delete_booking(booking.id).await.unwrap_err();

        assert!(matches!(err, BookingError::DeleteUnverified { remaining: 1, .. }));
        assert!(err.is_retryable());
        assert_eq!(f.manager.get_booking(booking.id).await.unwrap().status, BookingStatus::Cancelled);
        settle().await;
        assert!(!f.events.recorded().contains(&BookingEventType::BookingDeleted));
    }

    #[tokio::test]
    async fn lost_seat_race_removes_the_booking() {
        let f = fixture();
        let member = add_member(&f.store, None, 2).await;
        let class = add_class(&f.store, 10, 3, ClassGender::All).await;

        f.store.lose_seat_races(true);
        f.store.fail_next_deletes(1);
        let err = f.manager.create_booking(member.id, class.id).await.unwrap_err();

        assert!(matches!(err, BookingError::ClassFull(_)));
        assert_eq!(f.store.booking_count().await, 0);
        assert_eq!(enrolled(&f, class.id).await, 3);
        assert_eq!(balance(&f, member.id).await, 2);
    }

    #[tokio::test]
    async fn rollback_cancels_the_booking_when_deletes_keep_failing() {
        let f = fixture();
        let member = add_member(&f.store, None, 2).await;
        let class = add_class(&f.store, 10, 3, ClassGender::All).await;

        f.store.lose_seat_races(true);
        f.store.ignore_deletes_by_id(true);
        let err = f.manager.create_booking(member.id, class.id).await.unwrap_err();

        assert!(matches!(err, BookingError::ClassFull(_)));
        let left = f.manager.member_bookings(member.id).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].status, BookingStatus::Cancelled);
        assert_eq!(enrolled(&f, class.id).await, 3);

        f.store.lose_seat_races(false);
        f.manager.create_booking(member.id, class.id).await.unwrap();
        assert_eq!(enrolled(&f, class.id).await, 4);
    }

    #[tokio::test]
    async fn unconfirmed_rollback_is_a_retryable_store_error() {
        let f = fixture();
        let member = add_member(&f.store, None, 2).await;
        let class = add_class(&f.store, 10, 0, ClassGender::All).await;

        f.store.reject_session_debits(true);
        f.store.ignore_deletes_by_id(true);
        f.store.fail_cancellations(true);
        let err = f.manager.create_booking(member.id, class.id).await.unwrap_err();

        assert!(matches!(err, BookingError::Store(AppError::Timeout(_))));
        assert!(err.is_retryable());
        // The booking could not be rolled back, so its seat stays counted.
        let left = f.manager.member_bookings(member.id).await.unwrap();
        assert_eq!(left.len(), 1);
        assert!(left[0].is_confirmed());
        assert_eq!(enrolled(&f, class.id).await, 1);
    }

    #[tokio::test]
    async fn rejected_debit_removes_the_booking_and_releases_the_seat() {
        let f = fixture();
        let member = add_member(&f.store, None, 2).await;
        let class = add_class(&f.store, 10, 0, ClassGender::All).await;

        f.store.reject_session_debits(true);
        let err = f.manager.create_booking(member.id, class.id).await.unwrap_err();

        assert!(matches!(err, BookingError::InsufficientBalance(_)));
        assert_eq!(f.store.booking_count().await, 0);
        assert_eq!(enrolled(&f, class.id).await, 0);
        assert_eq!(balance(&f, member.id).await, 2);
        settle().await;
        assert!(f.events.recorded().is_empty());
    }

    #[tokio::test]
    async fn slow_store_calls_time_out() {
        let f = fixture_with(BookingSettings {
            store_timeout_seconds: 1,
            ..test_settings()
        });
        let member = add_member(&f.store, None, 2).await;
        let class = add_class(&f.store, 10, 0, ClassGender::All).await;

        f.store.stall_member_lookups(std::time::Duration::from_millis(1500));
        let err = f.manager.create_booking(member.id, class.id).await.unwrap_err();

        assert!(matches!(err, BookingError::Store(AppError::Timeout(_))));
        assert_eq!(f.store.booking_count().await, 0);

        f.store.stall_member_lookups(std::time::Duration::ZERO);
        assert!(f.manager.create_booking(member.id, class.id).await.is_ok());
    }

    #[tokio::test]
    async fn reconciliation_repairs_a_failed_enrolled_increment() {
        let f = fixture();
        let member = add_member(&f.store, None, 2).await;
        let class = add_class(&f.store, 10, 0, ClassGender::All).await;

        f.store.fail_enrollment_updates(true);
        let booking = f.manager.create_booking(member.id, class.id).await.unwrap();
        f.store.fail_enrollment_updates(false);

        assert!(booking.is_confirmed());
        assert_eq!(enrolled(&f, class.id).await, 0);

        assert_eq!(f.manager.reconcile_enrollment(class.id).await.unwrap(), 1);
        assert_eq!(enrolled(&f, class.id).await, 1);
        assert_eq!(f.manager.reconcile_enrollment(class.id).await.unwrap(), 1);

        let err = f.manager.reconcile_enrollment(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, BookingError::ClassNotFound(_)));
    }

    #[tokio::test]
    async fn reconcile_upcoming_reports_repairs() {
        let f = fixture();
        let consistent = add_class(&f.store, 10, 0, ClassGender::All).await;
        let drifted = add_class(&f.store, 10, 7, ClassGender::All).await;
        add_class_on(&f.store, today() - Duration::days(3), 10, 4, ClassGender::All).await;

        let summary = f.manager.reconcile_upcoming(today()).await.unwrap();

        assert_eq!(summary.classes_checked, 2);
        assert_eq!(summary.classes_repaired, 1);
        assert_eq!(summary.classes_failed, 0);
        assert_eq!(enrolled(&f, consistent.id).await, 0);
        assert_eq!(enrolled(&f, drifted.id).await, 0);
    }

    #[tokio::test]
    async fn enrolled_tracks_confirmed_bookings_across_a_sequence() {
        let f = fixture();
        let class = add_class(&f.store, 4, 0, ClassGender::All).await;
        let mut members = Vec::new();
        for _ in 0..6 {
            members.push(add_member(&f.store, None, 3).await);
        }

        let mut booked = Vec::new();
        for member in &members {
            if let Ok(booking) = f.manager.create_booking(member.id, class.id).await {
                booked.push(booking);
            }
        }
        assert_eq!(booked.len(), 4);

        f.manager.cancel_booking(booked[0].id, CancelledBy::Member).await.unwrap();
        f.manager.cancel_booking(booked[2].id, CancelledBy::Member).await.unwrap();
        f.manager.create_booking(members[4].id, class.id).await.unwrap();
        f.manager.cancel_booking(booked[2].id, CancelledBy::Member).await.unwrap();

        let confirmed = f
            .manager
            .class_bookings(class.id)
            .await
            .unwrap()
            .iter()
            .filter(|b| b.is_confirmed())
            .count() as i32;
        assert_eq!(confirmed, 3);
        assert_eq!(enrolled(&f, class.id).await, confirmed);
        assert_eq!(f.manager.reconcile_enrollment(class.id).await.unwrap(), confirmed);
    }

    #[tokio::test]
    async fn notification_failures_never_fail_the_booking() {
        let store = InMemoryStore::new();
        let manager = BookingManager::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(FailingDispatcher),
            test_settings(),
        );
        let member = add_member(&store, None, 2).await;
        let class = add_class(&store, 10, 0, ClassGender::All).await;

        let booking = manager.create_booking(member.id, class.id).await.unwrap();
        manager.cancel_booking(booking.id, CancelledBy::Member).await.unwrap();
        manager.delete_booking(booking.id).await.unwrap();
        settle().await;

        assert_eq!(store.booking_count().await, 0);
    }

    #[tokio::test]
    async fn legacy_mode_leaves_the_balance_to_admin_grants() {
        let f = fixture_with(BookingSettings {
            consumes_session: false,
            ..test_settings()
        });
        let member = add_member(&f.store, None, 1).await;
        let class = add_class(&f.store, 10, 0, ClassGender::All).await;

        let booking = f.manager.create_booking(member.id, class.id).await.unwrap();
        assert_eq!(balance(&f, member.id).await, 1);

        f.manager.cancel_booking(booking.id, CancelledBy::Member).await.unwrap();
        assert_eq!(balance(&f, member.id).await, 1);
        assert_eq!(enrolled(&f, class.id).await, 0);
    }

    #[tokio::test]
    async fn attendance_only_on_confirmed_bookings() {
        let f = fixture();
        let member = add_member(&f.store, None, 2).await;
        let class = add_class(&f.store, 10, 0, ClassGender::All).await;
        let booking = f.manager.create_booking(member.id, class.id).await.unwrap();

        let marked = f.manager.record_attendance(booking.id, true).await.unwrap();
        assert_eq!(marked.attendance, Some(true));

        f.manager.cancel_booking(booking.id, CancelledBy::Staff).await.unwrap();
        let err = f.manager.record_attendance(booking.id, false).await.unwrap_err();
        assert!(matches!(err, BookingError::InvalidState { status: BookingStatus::Cancelled, .. }));

        let err = f.manager.record_attendance(Uuid::new_v4(), true).await.unwrap_err();
        assert!(matches!(err, BookingError::NotFound(_)));
    }

    #[tokio::test]
    async fn granted_sessions_unlock_booking() {
        let f = fixture();
        let member = add_member(&f.store, None, 0).await;
        let class = add_class(&f.store, 10, 0, ClassGender::All).await;

        assert_eq!(f.manager.grant_sessions(member.id, 8).await.unwrap(), 8);
        f.manager.create_booking(member.id, class.id).await.unwrap();
        assert_eq!(balance(&f, member.id).await, 7);

        let err = f.manager.grant_sessions(Uuid::new_v4(), 1).await.unwrap_err();
        assert!(matches!(err, BookingError::MemberNotFound(_)));
        let err = f.manager.grant_sessions(member.id, 0).await.unwrap_err();
        assert!(matches!(err, BookingError::Store(AppError::Validation(_))));
    }
}
