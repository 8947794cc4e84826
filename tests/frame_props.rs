use modmap::cigar::Cigar;
use modmap::frame::{ExpandedFrame, FrameLayout};
use modmap::md::{decode_md, encode_md};
use modmap::motif::{MotifConfig, MotifScanner};
use modmap::Strand;
use proptest::prelude::*;

fn cigar_text(kinds: &'static [char]) -> impl Strategy<Value = String> {
    proptest::collection::vec((1u32..6, proptest::sample::select(kinds)), 1..8).prop_map(|ops| {
        ops.iter()
            .map(|(len, kind)| format!("{len}{kind}"))
            .collect::<String>()
    })
}

fn bases(len: usize) -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(
        prop_oneof![Just(b'A'), Just(b'C'), Just(b'G'), Just(b'T')],
        len,
    )
}

/// Cigar without clips plus reference span and query of matching lengths.
fn alignment(kinds: &'static [char]) -> impl Strategy<Value = (String, Vec<u8>, Vec<u8>)> {
    cigar_text(kinds).prop_flat_map(|cigar| {
        let parsed = Cigar::parse(&cigar).expect("generated cigar parses");
        let reference_len = parsed.reference_span();
        let query_len = parsed.ops_length("MI=X");
        (Just(cigar), bases(reference_len), bases(query_len))
    })
}

const ALL_OPS: &[char] = &['M', 'I', 'D', 'N', 'S', 'H', 'P', '=', 'X'];
const FRAME_OPS: &[char] = &['M', 'I', 'D', 'N', '=', 'X'];
const MD_OPS: &[char] = &['M', 'I', 'D', '=', 'X'];

proptest! {
    #[test]
    fn cigar_text_round_trips(text in cigar_text(ALL_OPS)) {
        let cigar = Cigar::parse(&text).expect("generated cigar parses");
        prop_assert_eq!(cigar.to_string(), text);
    }

    #[test]
    fn reference_span_matches_positions(
        (cigar, reference, query) in alignment(FRAME_OPS),
        position in 1u64..10_000,
    ) {
        let parsed = Cigar::parse(&cigar).unwrap();
        let layout = FrameLayout::from_cigar(&parsed);
        let start = position - 1;
        let frame = ExpandedFrame::build(&layout, &reference, &query, start, Strand::Forward).unwrap();

        prop_assert_eq!(layout.reference_len(), parsed.ops_length("MDN=X"));
        if let (Some(first), Some(last)) = (frame.positions().first(), frame.positions().last()) {
            prop_assert_eq!(*first, start);
            if !reference.is_empty() {
                prop_assert_eq!(*last + 1 - start, reference.len() as u64);
            }
        }
        prop_assert!(frame.positions().windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn expanded_arrays_share_frame_length(
        (cigar, reference, query) in alignment(FRAME_OPS),
        reverse in any::<bool>(),
    ) {
        let parsed = Cigar::parse(&cigar).unwrap();
        let layout = FrameLayout::from_cigar(&parsed);
        let strand = if reverse { Strand::Reverse } else { Strand::Forward };
        let frame = ExpandedFrame::build(&layout, &reference, &query, 0, strand).unwrap();

        let frame_len = parsed.ops_length("MIDN=X");
        prop_assert_eq!(frame.reference().len(), frame_len);
        prop_assert_eq!(frame.query().len(), frame_len);
        prop_assert_eq!(frame.positions().len(), frame_len);
    }

    #[test]
    fn difference_tag_decodes_to_reference(
        (cigar, reference, query) in alignment(MD_OPS),
    ) {
        let layout = FrameLayout::from_cigar(&Cigar::parse(&cigar).unwrap());
        let tag = encode_md(&reference, &query, &layout).unwrap();
        let decoded = decode_md(&tag, &layout, &query).unwrap();
        prop_assert_eq!(&decoded, &reference);
        prop_assert_eq!(encode_md(&decoded, &query, &layout).unwrap(), tag);
    }

    #[test]
    fn motif_sites_do_not_depend_on_strand(
        (cigar, reference, query) in alignment(FRAME_OPS),
        position in 1u64..10_000,
    ) {
        let layout = FrameLayout::from_cigar(&Cigar::parse(&cigar).unwrap());
        let scanner = MotifScanner::new(&MotifConfig::default()).unwrap();
        let spans = |strand| -> Vec<(u64, u64)> {
            let frame = ExpandedFrame::build(&layout, &reference, &query, position - 1, strand).unwrap();
            scanner.sites(&frame).iter().map(|site| (site.begin, site.end)).collect()
        };
        prop_assert_eq!(spans(Strand::Forward), spans(Strand::Reverse));
    }
}
