//! Broadcast group behavior: priority ordering, slot stability, permission
//! handling and frame forwarding.

use super::{RecordingSender, SentEvent};
use crate::config::VoiceGroupSettings;
use crate::error::VoiceError;
use crate::group::VoiceGroup;
use crate::sender::VoiceControlEvent;
use crate::types::MemberId;
use std::sync::Arc;

fn broadcast_group(max_voices: u8) -> (VoiceGroup, Arc<RecordingSender>) {
    let sender = Arc::new(RecordingSender::new());
    let group = VoiceGroup::new(VoiceGroupSettings::broadcast(max_voices), sender.clone(), None)
        .expect("broadcast group");
    (group, sender)
}

/// Adds a speaker with the given priority and a plain listener.
fn speaker(group: &VoiceGroup, priority: i32) -> MemberId {
    let id = MemberId::new();
    group.add_member(id, 0, Some(priority), true).unwrap();
    id
}

fn listener(group: &VoiceGroup) -> MemberId {
    let id = MemberId::new();
    group.add_member(id, 0, None, false).unwrap();
    group.set_listener(id, true).unwrap();
    id
}

#[test]
fn test_priority_ties_go_to_earlier_member() {
    let (group, sender) = broadcast_group(2);
    let a = speaker(&group, 5);
    let b = speaker(&group, 3);
    let c = speaker(&group, 3);
    for member in [a, b, c] {
        group.set_member_speaking(member, true).unwrap();
    }
    let l = listener(&group);

    assert_eq!(group.voice_assignments(l), vec![(0, a), (1, b)]);
    assert_eq!(sender.allocations(), vec![(a, l, 0), (b, l, 1)]);
    group.verify_routes().unwrap();

    // C is unheard, so its transitions change nothing for L
    sender.clear();
    group.set_member_speaking(c, false).unwrap();
    group.set_member_speaking(c, true).unwrap();
    assert!(sender.events().is_empty());

    group.set_member_speaking(a, false).unwrap();
    assert_eq!(
        sender.events(),
        vec![
            SentEvent::Deallocate {
                speaker: a,
                listener: l,
                voice: 0
            },
            SentEvent::Allocate {
                speaker: c,
                listener: l,
                voice: 0,
                positional: false
            },
        ]
    );
    assert_eq!(group.voice_assignments(l), vec![(0, c), (1, b)]);
    group.verify_routes().unwrap();
}

#[test]
fn test_higher_priority_speaker_displaces_lowest() {
    let (group, sender) = broadcast_group(2);
    let a = speaker(&group, 1);
    let b = speaker(&group, 2);
    let vip = speaker(&group, 10);
    let l = listener(&group);
    group.set_member_speaking(a, true).unwrap();
    group.set_member_speaking(b, true).unwrap();
    assert_eq!(group.voice_assignments(l), vec![(0, a), (1, b)]);

    sender.clear();
    group.set_member_speaking(vip, true).unwrap();
    assert_eq!(sender.deallocations(), vec![(a, l, 0)]);
    assert_eq!(sender.allocations(), vec![(vip, l, 0)]);
    // B never moved
    assert_eq!(group.voice_assignments(l), vec![(0, vip), (1, b)]);
}

#[test]
fn test_priority_change_reorders_speakers() {
    let (group, _) = broadcast_group(1);
    let a = speaker(&group, 5);
    let b = speaker(&group, 1);
    let l = listener(&group);
    group.set_member_speaking(a, true).unwrap();
    group.set_member_speaking(b, true).unwrap();
    assert_eq!(group.voice_assignments(l), vec![(0, a)]);

    group.set_member_priority(b, 9).unwrap();
    assert_eq!(group.voice_assignments(l), vec![(0, b)]);
    assert_eq!(group.member_flags(b).map(|f| f.priority), Some(9));
    group.verify_routes().unwrap();
}

#[test]
fn test_stop_listening_releases_each_slot_once() {
    let (group, sender) = broadcast_group(2);
    let a = speaker(&group, 1);
    let b = speaker(&group, 1);
    let l = listener(&group);
    group.set_member_speaking(a, true).unwrap();
    group.set_member_speaking(b, true).unwrap();

    sender.clear();
    group.set_listener(l, false).unwrap();

    let mut released = sender.deallocations();
    released.sort_by_key(|(_, _, voice)| *voice);
    assert_eq!(released, vec![(a, l, 0), (b, l, 1)]);
    assert!(group.voice_assignments(l).is_empty());
    assert!(!group.is_listening(l));

    // Speakers keep talking to nobody
    sender.clear();
    group.set_member_speaking(a, false).unwrap();
    assert!(sender.events().is_empty());
    group.verify_routes().unwrap();
}

#[test]
fn test_listening_again_restores_slots() {
    let (group, sender) = broadcast_group(2);
    let a = speaker(&group, 1);
    let l = listener(&group);
    group.set_member_speaking(a, true).unwrap();
    group.set_listener(l, false).unwrap();

    sender.clear();
    group.set_listener(l, true).unwrap();
    assert_eq!(sender.allocations(), vec![(a, l, 0)]);
}

#[test]
fn test_removing_speaker_unwinds_every_route() {
    let (group, sender) = broadcast_group(2);
    let a = speaker(&group, 1);
    let l1 = listener(&group);
    let l2 = listener(&group);
    group.set_member_speaking(a, true).unwrap();
    assert_eq!(group.listeners_of(a).len(), 2);

    sender.clear();
    assert!(group.remove_member(a));

    let mut released = sender.deallocations();
    released.sort();
    let mut expected = vec![(a, l1, 0), (a, l2, 0)];
    expected.sort();
    assert_eq!(released, expected);
    assert_eq!(
        sender.events().last(),
        Some(&SentEvent::Control(VoiceControlEvent::MemberRemoved {
            group_id: group.group_id(),
            member_id: a
        }))
    );
    assert!(group.listeners_of(a).is_empty());
    assert!(!group.is_member(a));
    assert!(!group.remove_member(a));
    group.verify_routes().unwrap();
}

#[test]
fn test_removing_listener_frees_its_slots() {
    let (group, sender) = broadcast_group(2);
    let a = speaker(&group, 1);
    let l = listener(&group);
    group.set_member_speaking(a, true).unwrap();

    sender.clear();
    assert!(group.remove_member(l));
    assert_eq!(sender.deallocations(), vec![(a, l, 0)]);
    assert!(group.listeners_of(a).is_empty());
    assert_eq!(group.member_count(), 1);
}

#[test]
fn test_speaking_without_permission_is_ignored() {
    let (group, sender) = broadcast_group(2);
    let quiet = MemberId::new();
    group.add_member(quiet, 0, None, false).unwrap();
    let l = listener(&group);

    sender.clear();
    assert!(group.set_member_speaking(quiet, true).is_ok());
    assert!(sender.events().is_empty());
    assert!(!group.is_member_speaking(quiet));
    assert!(group.voice_assignments(l).is_empty());
    group.verify_routes().unwrap();

    group.set_allowed_speaker(quiet, true).unwrap();
    group.set_member_speaking(quiet, true).unwrap();
    assert_eq!(sender.allocations(), vec![(quiet, l, 0)]);
}

#[test]
fn test_revoking_permission_stops_speaker() {
    let (group, sender) = broadcast_group(2);
    let a = speaker(&group, 1);
    let l = listener(&group);
    group.set_member_speaking(a, true).unwrap();

    sender.clear();
    group.set_allowed_speaker(a, false).unwrap();
    assert_eq!(sender.deallocations(), vec![(a, l, 0)]);
    assert!(!group.is_member_speaking(a));
    assert!(!group.is_allowed_speaker(a));
    group.verify_routes().unwrap();
}

#[test]
fn test_redundant_transitions_are_rejected() {
    let (group, sender) = broadcast_group(2);
    let a = speaker(&group, 1);
    group.set_member_speaking(a, true).unwrap();

    sender.clear();
    assert!(matches!(
        group.set_member_speaking(a, true),
        Err(VoiceError::AlreadyInState { state: "speaking", value: true, .. })
    ));
    assert!(matches!(
        group.set_listener(a, false),
        Err(VoiceError::AlreadyInState { state: "listening", value: false, .. })
    ));
    assert!(matches!(
        group.set_allowed_speaker(a, true),
        Err(VoiceError::AlreadyInState { .. })
    ));
    assert!(matches!(
        group.set_member_speaking(MemberId::new(), true),
        Err(VoiceError::NotMember(_))
    ));
    assert!(sender.events().is_empty());
}

#[test]
fn test_admission_list_and_duplicates() {
    let sender = Arc::new(RecordingSender::new());
    let admitted = MemberId::new();
    let mut settings = VoiceGroupSettings::broadcast(2);
    settings.allowed_members = Some(vec![admitted]);
    let group = VoiceGroup::new(settings, sender.clone(), None).unwrap();

    assert!(matches!(
        group.add_member(MemberId::new(), 1, None, true),
        Err(VoiceError::NotAdmitted(_))
    ));
    group.add_member(admitted, 1, None, true).unwrap();
    assert!(matches!(
        group.add_member(admitted, 2, None, true),
        Err(VoiceError::AlreadyMember(_))
    ));
    assert_eq!(group.member_count(), 1);
    assert_eq!(sender.control_events().len(), 1);
}

#[test]
fn test_member_added_broadcast_uses_default_priority() {
    let sender = Arc::new(RecordingSender::new());
    let mut settings = VoiceGroupSettings::broadcast(2);
    settings.default_priority = 7;
    let group = VoiceGroup::new(settings, sender.clone(), None).unwrap();
    let member = MemberId::new();
    group.add_member(member, 3, None, true).unwrap();

    assert_eq!(
        sender.control_events(),
        vec![VoiceControlEvent::MemberAdded {
            group_id: group.group_id(),
            member_id: member,
            priority: 7,
            allowed_speaker: true,
            positional: false,
        }]
    );
    assert_eq!(group.member_flags(member).map(|f| f.priority), Some(7));
}

#[test]
fn test_frames_follow_routes_and_ignore_lists() {
    let (group, sender) = broadcast_group(2);
    let a = speaker(&group, 1);
    let l1 = listener(&group);
    let l2 = listener(&group);
    group.set_member_speaking(a, true).unwrap();

    assert_eq!(group.send_voice_frame_to_listeners(a, &[1, 2, 3]), 2);
    let mut frames = sender.frames();
    frames.sort();
    let mut expected = vec![(a, l1, 0), (a, l2, 0)];
    expected.sort();
    assert_eq!(frames, expected);

    group.apply_ignore_list(l2, vec![a]).unwrap();
    assert!(group.voice_assignments(l2).is_empty());

    sender.clear();
    assert_eq!(group.send_voice_frame_to_listeners(a, &[4, 5]), 1);
    assert_eq!(sender.frames(), vec![(a, l1, 0)]);
    assert_eq!(group.stats().frames_forwarded, 3);
}

#[test]
fn test_frames_from_unroutable_senders_are_dropped() {
    let (group, sender) = broadcast_group(2);
    let quiet = MemberId::new();
    group.add_member(quiet, 0, None, false).unwrap();
    listener(&group);

    sender.clear();
    assert_eq!(group.send_voice_frame_to_listeners(MemberId::new(), &[0; 8]), 0);
    assert_eq!(group.send_voice_frame_to_listeners(quiet, &[0; 8]), 0);
    assert!(sender.frames().is_empty());
    assert_eq!(group.stats().frames_dropped, 2);
}

#[test]
fn test_ignore_updates_wait_for_baseline() {
    let (group, sender) = broadcast_group(2);
    let a = speaker(&group, 2);
    let b = speaker(&group, 1);
    let l = listener(&group);
    group.set_member_speaking(a, true).unwrap();
    group.set_member_speaking(b, true).unwrap();

    sender.clear();
    group.update_ignore_list(l, vec![a], vec![]).unwrap();
    assert!(sender.events().is_empty(), "update is queued until the list arrives");

    group.apply_ignore_list(l, vec![]).unwrap();
    assert_eq!(sender.deallocations(), vec![(a, l, 0)]);
    assert_eq!(group.voice_assignments(l), vec![(1, b)]);

    group.update_ignore_list(l, vec![], vec![a]).unwrap();
    assert_eq!(group.voice_assignments(l), vec![(0, a), (1, b)]);
    group.verify_routes().unwrap();
}

#[test]
fn test_listen_to_yourself() {
    let (group, sender) = broadcast_group(2);
    let a = MemberId::new();
    group.add_member(a, 0, None, true).unwrap();
    group.set_listener(a, true).unwrap();
    group.set_member_speaking(a, true).unwrap();
    assert!(group.voice_assignments(a).is_empty());

    group.set_listen_to_yourself(a, true).unwrap();
    assert_eq!(sender.allocations(), vec![(a, a, 0)]);
    group.verify_routes().unwrap();

    group.set_listen_to_yourself(a, false).unwrap();
    assert_eq!(sender.deallocations(), vec![(a, a, 0)]);
}

#[test]
fn test_slot_capacity_is_never_exceeded() {
    let (group, _) = broadcast_group(3);
    let speakers: Vec<MemberId> = (0..6).map(|p| speaker(&group, p)).collect();
    let l = listener(&group);
    for member in &speakers {
        group.set_member_speaking(*member, true).unwrap();
        assert!(group.voice_assignments(l).len() <= 3);
        group.verify_routes().unwrap();
    }

    // Highest three priorities win
    let mut heard: Vec<MemberId> = group.voice_assignments(l).into_iter().map(|(_, s)| s).collect();
    heard.sort();
    let mut expected = speakers[3..].to_vec();
    expected.sort();
    assert_eq!(heard, expected);
}

#[test]
fn test_same_event_sequence_gives_same_notifications() {
    let run = || {
        let (group, sender) = broadcast_group(2);
        let members: Vec<MemberId> = (0..4)
            .map(|i| {
                let id = MemberId::new();
                group.add_member(id, i, Some((i % 2) as i32), true).unwrap();
                group.set_listener(id, true).unwrap();
                id
            })
            .collect();
        for member in &members {
            group.set_member_speaking(*member, true).unwrap();
        }
        group.set_member_speaking(members[1], false).unwrap();
        group.remove_member(members[3]);

        // Map ids to admission positions so two runs compare
        let position = |id: MemberId| members.iter().position(|m| *m == id);
        sender
            .events()
            .into_iter()
            .filter_map(|event| match event {
                SentEvent::Allocate { speaker, listener, voice, .. } => {
                    Some(("alloc", position(speaker), position(listener), voice))
                }
                SentEvent::Deallocate { speaker, listener, voice } => {
                    Some(("dealloc", position(speaker), position(listener), voice))
                }
                _ => None,
            })
            .collect::<Vec<_>>()
    };

    assert_eq!(run(), run());
}
